use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use regex::Regex;
use tracing::{debug, instrument};

use crate::models::{AuthError, RegisterRequest};

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";
const PHONE_PATTERN: &str = r"^\+?[1-9]\d{1,14}$|^\+?\d{1,4}[\s\-\.\(\)]*\d{1,14}$";
const USERNAME_PATTERN: &str = r"^[a-zA-Z0-9_.]{3,50}$";

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub struct PasswordService;

impl PasswordService {
    #[instrument(skip(password))]
    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// `Ok(false)` on a wrong password; `Err` only when the stored hash is
    /// not a valid PHC string.
    #[instrument(skip(password, hash))]
    pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("Stored password hash is invalid: {}", e)))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(e.to_string())),
        }
    }
}

fn matches(pattern: &str, value: &str) -> Result<bool, AuthError> {
    let regex = Regex::new(pattern).map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(regex.is_match(value))
}

/// Shape checks on a registration form, in field order.
pub fn validate_registration(request: &RegisterRequest) -> Result<(), AuthError> {
    debug!("Validating registration for {}", request.username);

    if !matches(USERNAME_PATTERN, request.username.trim())? {
        return Err(AuthError::ValidationError(
            "Username must be 3-50 letters, digits, dots or underscores".to_string(),
        ));
    }
    if request.email.len() > 254 || !matches(EMAIL_PATTERN, request.email.trim())? {
        return Err(AuthError::ValidationError("Invalid email address".to_string()));
    }
    if !matches(PHONE_PATTERN, request.phone_number.trim())? {
        return Err(AuthError::ValidationError("Invalid phone number".to_string()));
    }
    if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
        return Err(AuthError::ValidationError("First and last name are required".to_string()));
    }
    validate_password_strength(&request.password)
}

pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_numeric()) {
        return Err(AuthError::ValidationError(
            "Password must contain both letters and numbers".to_string(),
        ));
    }
    Ok(())
}
