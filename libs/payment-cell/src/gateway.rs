use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use hmac::{Hmac, Mac};
use sha2::Sha512;

use shared_config::AppConfig;

use crate::models::PaymentError;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH_PARAM: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE_PARAM: &str = "vnp_SecureHashType";

/// VNPay redirect-and-return adapter.
///
/// Requests and callbacks are signed with HMAC-SHA512 over the `vnp_*`
/// parameters sorted by name, empty values dropped, values form-encoded.
#[derive(Debug, Clone)]
pub struct VnPayGateway {
    tmn_code: String,
    hash_secret: String,
    url: String,
    return_url: String,
}

impl VnPayGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tmn_code: config.vnpay_tmn_code.clone(),
            hash_secret: config.vnpay_hash_secret.clone(),
            url: config.vnpay_url.clone(),
            return_url: config.vnpay_return_url.clone(),
        }
    }

    pub fn create_payment_url(
        &self,
        order_info: &str,
        amount: f64,
        order_id: i64,
        ip_addr: &str,
        created_at: NaiveDateTime,
    ) -> Result<String, PaymentError> {
        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), "2.1.0".to_string());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.tmn_code.clone());
        params.insert("vnp_Amount".to_string(), to_minor_units(amount).to_string());
        params.insert("vnp_CurrCode".to_string(), "VND".to_string());
        params.insert("vnp_TxnRef".to_string(), order_id.to_string());
        params.insert("vnp_OrderInfo".to_string(), order_info.to_string());
        params.insert("vnp_OrderType".to_string(), "billpayment".to_string());
        params.insert("vnp_Locale".to_string(), "vn".to_string());
        params.insert("vnp_ReturnUrl".to_string(), self.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), ip_addr.to_string());
        params.insert("vnp_CreateDate".to_string(), created_at.format("%Y%m%d%H%M%S").to_string());

        let query = canonical_query(&params);
        let secure_hash = self.sign(&query)?;

        Ok(format!("{}?{}&{}={}", self.url, query, SECURE_HASH_PARAM, secure_hash))
    }

    /// Check the signature of a return/IPN callback.
    pub fn verify_response(&self, params: &BTreeMap<String, String>) -> bool {
        let Some(received) = params.get(SECURE_HASH_PARAM).and_then(|h| decode_hex(h)) else {
            return false;
        };

        let signed: BTreeMap<String, String> = params
            .iter()
            .filter(|(k, _)| {
                k.starts_with("vnp_") && *k != SECURE_HASH_PARAM && *k != SECURE_HASH_TYPE_PARAM
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let Ok(mut mac) = HmacSha512::new_from_slice(self.hash_secret.as_bytes()) else {
            return false;
        };
        mac.update(canonical_query(&signed).as_bytes());
        mac.verify_slice(&received).is_ok()
    }

    fn sign(&self, query: &str) -> Result<String, PaymentError> {
        let mut mac = HmacSha512::new_from_slice(self.hash_secret.as_bytes())
            .map_err(|_| PaymentError::Gateway("Failed to create HMAC".to_string()))?;
        mac.update(query.as_bytes());
        Ok(encode_hex(&mac.finalize().into_bytes()))
    }
}

/// The gateway expects amounts in hundredths of a dong.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// `key=value` pairs joined by `&`, in key order, skipping empty values.
/// Values use form encoding (space becomes `+`).
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v).replace("%20", "+")))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use shared_utils::test_utils::TestConfig;

    fn gateway() -> VnPayGateway {
        VnPayGateway::new(&TestConfig::default().to_app_config())
    }

    fn created_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(10, 15, 30).unwrap()
    }

    fn query_params(url: &str) -> BTreeMap<String, String> {
        let query = url.split_once('?').unwrap().1;
        query
            .split('&')
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap();
                let v = urlencoding::decode(&v.replace('+', " ")).unwrap().into_owned();
                (k.to_string(), v)
            })
            .collect()
    }

    #[test]
    fn canonical_query_sorts_drops_empty_and_form_encodes() {
        let mut params = BTreeMap::new();
        params.insert("vnp_OrderInfo".to_string(), "Pay appointment #5".to_string());
        params.insert("vnp_Amount".to_string(), "25000000".to_string());
        params.insert("vnp_BankCode".to_string(), String::new());

        assert_eq!(
            canonical_query(&params),
            "vnp_Amount=25000000&vnp_OrderInfo=Pay+appointment+%235"
        );
    }

    #[test]
    fn payment_url_matches_reference_signature() {
        let url = gateway()
            .create_payment_url("Payment for appointment 100", 250000.0, 900, "127.0.0.1", created_at())
            .unwrap();

        assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?vnp_Amount=25000000&vnp_Command=pay"));
        assert!(url.contains("vnp_OrderInfo=Payment+for+appointment+100"));
        assert!(url.contains("vnp_ReturnUrl=http%3A%2F%2Flocalhost%3A3000%2Fpayments%2Fvnpay%2Freturn"));
        assert!(url.ends_with(concat!(
            "vnp_SecureHash=8f3d3fb1f47a895726f35ba271a66e3322b9d781c66cd581522d215e75149ad2",
            "f5d14f6c30ababfe22a0751e26ab013c61b7b00450da6f5d3f4a75650cb4b3b9"
        )));
    }

    #[test]
    fn signed_url_parameters_verify() {
        let gateway = gateway();
        let url = gateway
            .create_payment_url("Payment for appointment 100", 250000.0, 900, "127.0.0.1", created_at())
            .unwrap();

        let params = query_params(&url);
        assert!(gateway.verify_response(&params));
    }

    #[test]
    fn tampered_or_unsigned_parameters_fail() {
        let gateway = gateway();
        let url = gateway
            .create_payment_url("Payment for appointment 100", 250000.0, 900, "127.0.0.1", created_at())
            .unwrap();

        let mut tampered = query_params(&url);
        tampered.insert("vnp_Amount".to_string(), "100".to_string());
        assert!(!gateway.verify_response(&tampered));

        let mut unsigned = query_params(&url);
        unsigned.remove(SECURE_HASH_PARAM);
        assert!(!gateway.verify_response(&unsigned));

        let mut garbage = query_params(&url);
        garbage.insert(SECURE_HASH_PARAM.to_string(), "zz".to_string());
        assert!(!gateway.verify_response(&garbage));
    }

    #[test]
    fn uppercase_hash_is_accepted() {
        let gateway = gateway();
        let url = gateway
            .create_payment_url("Payment for appointment 100", 250000.0, 900, "127.0.0.1", created_at())
            .unwrap();

        let mut params = query_params(&url);
        let upper = params[SECURE_HASH_PARAM].to_uppercase();
        params.insert(SECURE_HASH_PARAM.to_string(), upper);
        assert!(gateway.verify_response(&params));
    }

    #[test]
    fn minor_units_round_instead_of_truncating() {
        assert_eq!(to_minor_units(250000.0), 25000000);
        assert_eq!(to_minor_units(0.29), 29);
    }
}
