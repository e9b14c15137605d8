use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use patient_cell::HealthRecordService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::ROLE_PATIENT;
use shared_utils::jwt::{issue_token, TokenSubject};

use crate::models::{AuthError, LoginRequest, LoginResponse, RegisterRequest, UserAccount};
use crate::services::password::{validate_registration, PasswordService};

pub struct AuthService {
    supabase: SupabaseClient,
    health_records: HealthRecordService,
    jwt_secret: String,
    jwt_ttl_hours: i64,
}

impl AuthService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            health_records: HealthRecordService::new(config),
            jwt_secret: config.jwt_secret.clone(),
            jwt_ttl_hours: config.jwt_ttl_hours,
        }
    }

    /// Create a patient account: the `users` row, its `patients` row and an
    /// empty health record. Rows created before a failing step are removed.
    pub async fn register(&self, request: RegisterRequest) -> Result<UserAccount, AuthError> {
        validate_registration(&request)?;

        let username = request.username.trim();
        let email = request.email.trim();
        let phone = request.phone_number.trim();

        if self.is_taken("username", username).await? {
            warn!("Registration rejected, username {} taken", username);
            return Err(AuthError::UsernameTaken);
        }
        if self.is_taken("email", email).await? {
            warn!("Registration rejected, email already registered");
            return Err(AuthError::EmailTaken);
        }
        if self.is_taken("phone_number", phone).await? {
            warn!("Registration rejected, phone number already registered");
            return Err(AuthError::PhoneTaken);
        }

        let password_hash = PasswordService::hash_password(&request.password)?;

        let rows: Vec<UserAccount> = self.supabase
            .insert("users", json!({
                "username": username,
                "email": email,
                "phone_number": phone,
                "password": password_hash,
                "first_name": request.first_name.trim(),
                "last_name": request.last_name.trim(),
                "address": request.address,
                "role": ROLE_PATIENT,
                "is_active": true,
            }))
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

        let account = rows
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::DatabaseError("Failed to create user".to_string()))?;

        if let Err(e) = self.create_patient_profile(account.user_id).await {
            error!("Registration of user {} failed after insert: {}", account.user_id, e);
            self.remove_account(account.user_id).await;
            return Err(e);
        }

        info!("Registered patient {} ({})", account.user_id, account.username);
        Ok(account)
    }

    async fn create_patient_profile(&self, user_id: i64) -> Result<(), AuthError> {
        let _: Vec<Value> = self.supabase
            .insert("patients", json!({ "patient_id": user_id }))
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

        self.health_records
            .create_empty_health_record(user_id)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Best effort; a failure here leaves an orphan row that is logged.
    async fn remove_account(&self, user_id: i64) {
        for path in [
            format!("/rest/v1/health_records?patient_id=eq.{}", user_id),
            format!("/rest/v1/patients?patient_id=eq.{}", user_id),
            format!("/rest/v1/users?user_id=eq.{}", user_id),
        ] {
            if let Err(e) = self.supabase.delete::<Value>(&path).await {
                error!("Rollback of user {} failed at {}: {}", user_id, path, e);
            }
        }
    }

    async fn is_taken(&self, column: &str, value: &str) -> Result<bool, AuthError> {
        let path = format!(
            "/rest/v1/users?select=user_id&{}=eq.{}",
            column,
            urlencoding::encode(value)
        );
        let rows: Vec<Value> = self.supabase
            .select(&path)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?;
        Ok(!rows.is_empty())
    }

    /// Check credentials and issue a bearer token.
    ///
    /// Unknown usernames and wrong passwords produce the same error. The
    /// disabled-account error is only reported once the password matched.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, AuthError> {
        let username = request.username.trim();
        debug!("Login attempt for {}", username);

        let path = format!("/rest/v1/users?username=eq.{}", urlencoding::encode(username));
        let account = self.supabase
            .select_one::<UserAccount>(&path)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?
            .ok_or(AuthError::InvalidCredentials)?;

        let Some(hash) = account.password.as_deref() else {
            warn!("User {} has no password set", account.user_id);
            return Err(AuthError::InvalidCredentials);
        };

        let verified = PasswordService::verify_password(&request.password, hash).unwrap_or_else(|e| {
            warn!("Password check for user {} failed: {}", account.user_id, e);
            false
        });
        if !verified {
            warn!("Invalid password for {}", username);
            return Err(AuthError::InvalidCredentials);
        }

        if !account.is_active {
            warn!("Login refused for disabled account {}", account.user_id);
            return Err(AuthError::AccountDisabled);
        }

        let access_token = issue_token(
            &TokenSubject {
                user_id: account.user_id,
                email: account.email.as_deref(),
                username: Some(&account.username),
                role: &account.role,
            },
            &self.jwt_secret,
            self.jwt_ttl_hours,
        )
        .map_err(AuthError::TokenError)?;

        info!("User {} logged in", account.user_id);
        Ok(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt_ttl_hours * 3600,
            user: account,
        })
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<UserAccount, AuthError> {
        let path = format!("/rest/v1/users?user_id=eq.{}", user_id);
        self.supabase
            .select_one::<UserAccount>(&path)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?
            .ok_or(AuthError::UserNotFound)
    }
}
