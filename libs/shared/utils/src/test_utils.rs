use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

/// Address nothing listens on; requests to it fail with connection refused.
pub const UNREACHABLE_DATABASE_URL: &str = "http://127.0.0.1:9";

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub database_timeout_seconds: u64,
    pub fallback_store_enabled: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            database_timeout_seconds: 1,
            fallback_store_enabled: true,
        }
    }
}

impl TestConfig {
    pub fn with_database_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn unreachable_database() -> Self {
        Self::with_database_url(UNREACHABLE_DATABASE_URL)
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            database_timeout_seconds: self.database_timeout_seconds,
            fallback_store_enabled: self.fallback_store_enabled,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// An auth user with a fresh UUID, as Supabase would issue.
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl TestUser {
    fn with_role(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::with_role(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::with_role(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::with_role(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

/// HS256 tokens in the shape the auth middleware accepts.
pub struct JwtTestUtils;

impl JwtTestUtils {
    /// Valid for `exp_hours` (default 24); a negative value yields an
    /// already-expired token.
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::hours(exp_hours.unwrap_or(24));

        let claims = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": issued_at.timestamp(),
            "exp": expires_at.timestamp()
        });
        sign(&claims, secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "not-the-project-secret", None)
    }
}

fn sign(claims: &serde_json::Value, secret: &str) -> String {
    let encode = |value: &serde_json::Value| general_purpose::URL_SAFE_NO_PAD.encode(value.to_string());
    let signing_input = format!("{}.{}", encode(&json!({"alg": "HS256", "typ": "JWT"})), encode(claims));

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signing_input.as_bytes());
    let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{}.{}", signing_input, signature)
}

/// PostgREST row shapes for the telehealth tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_row(id: i64, user_id: &str, first_name: &str, last_name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "user_id": user_id,
            "first_name": first_name,
            "last_name": last_name,
            "email": format!("{}@example.com", first_name.to_lowercase()),
            "phone_number": "+353 1 555 0100"
        })
    }

    pub fn doctor_row(id: i64, user_id: &str, first_name: &str, last_name: &str, specialization: &str) -> serde_json::Value {
        json!({
            "id": id,
            "user_id": user_id,
            "first_name": first_name,
            "last_name": last_name,
            "email": format!("{}@clinic.example.com", last_name.to_lowercase()),
            "phone_number": "+353 1 555 0200",
            "specialization": specialization
        })
    }

    pub fn appointment_row(
        id: i64,
        patient_id: i64,
        doctor_id: i64,
        date: &str,
        time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "parent_appointment_id": null,
            "appointment_date": date,
            "appointment_time": time,
            "status": status,
            "appointment_type": "general",
            "notes": null,
            "location": "Telehealth",
            "symptoms": null,
            "possible_illness_1": null,
            "possible_illness_2": null,
            "recommended_specialist_1": null,
            "recommended_specialist_2": null,
            "criticality": null,
            "created_at": "2025-05-01T08:00:00Z",
            "updated_at": "2025-05-01T08:00:00Z"
        })
    }

    pub fn consultation_row(
        id: i64,
        appointment_id: i64,
        doctor_id: i64,
        patient_id: i64,
        status: &str,
    ) -> serde_json::Value {
        let ended = if status == "completed" {
            json!("2025-06-01T09:40:00Z")
        } else {
            serde_json::Value::Null
        };

        json!({
            "id": id,
            "appointment_id": appointment_id,
            "doctor_id": doctor_id,
            "patient_id": patient_id,
            "status": status,
            "actual_start_time": "2025-06-01T09:02:00Z",
            "actual_end_time": ended,
            "created_at": "2025-06-01T09:02:00Z",
            "updated_at": "2025-06-01T09:02:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "code": code,
            "message": message,
            "details": null,
            "hint": null
        })
    }
}
