//! Login, signup and logout against the Collabo auth routes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::mediator::{Audience, Mediator, RequestOptions};
use super::{AuthError, RequestError};

const LOGIN_PATH: &str = "/auth/login";
const SIGNUP_PATH: &str = "/auth/signup";

/// Minimum password length accepted at signup
const MIN_PASSWORD_LENGTH: usize = 8;

/// Characters that satisfy the "special character" password rule
const PASSWORD_SPECIALS: &str = "!@#$%^&*(),.?\":{}|<>";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupResponse {
    #[serde(default)]
    pub message: Option<String>,
    /// Id of the new user
    #[serde(default)]
    pub user: Option<Value>,
    /// Present only if the server logs the new user straight in
    #[serde(default, alias = "token")]
    pub access_token: Option<String>,
}

impl SignupForm {
    /// Check the form before it is sent. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("Name is required".to_string());
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => problems.push("Email address is not valid".to_string()),
        }

        let password = &self.password;
        if password.chars().count() < MIN_PASSWORD_LENGTH
            || !password.chars().any(|c| c.is_ascii_uppercase())
            || !password.chars().any(|c| c.is_ascii_digit())
            || !password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
        {
            problems.push(format!(
                "Password must be at least {} characters with an uppercase letter, a number and a special character",
                MIN_PASSWORD_LENGTH
            ));
        }
        if self.password != self.confirm_password {
            problems.push("Passwords do not match".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl Mediator {
    /// Exchange credentials for a token and start a session.
    ///
    /// A 401 here means wrong credentials: it comes back as
    /// `RequestError::Status` and does not redirect to login.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let body = json!({ "email": email, "password": password });
        let value = self
            .dispatch(LOGIN_PATH, RequestOptions::post(body), Audience::Anonymous)
            .await?;
        let response: LoginResponse = serde_json::from_value(value).map_err(|e| {
            RequestError::transport(format!("Failed to parse login response: {}", e))
        })?;

        self.set_token(&response.access_token)?;
        if let Some(ref user) = response.user {
            self.session().set_user(user)?;
        }
        info!(email, "Logged in");
        Ok(response)
    }

    /// Register a new account. Invalid forms are rejected without a request.
    pub async fn signup(&self, form: &SignupForm) -> Result<SignupResponse, AuthError> {
        form.validate().map_err(AuthError::Invalid)?;

        let body = serde_json::to_value(form)
            .map_err(|e| RequestError::transport(format!("Failed to encode signup form: {}", e)))?;
        let value = self
            .dispatch(SIGNUP_PATH, RequestOptions::post(body), Audience::Anonymous)
            .await?;
        let response: SignupResponse = serde_json::from_value(value).map_err(|e| {
            RequestError::transport(format!("Failed to parse signup response: {}", e))
        })?;

        if let Some(ref token) = response.access_token {
            self.set_token(token)?;
        }
        info!(email = %form.email, "Signed up");
        Ok(response)
    }

    pub fn logout(&self) {
        self.clear_token();
        info!("Logged out");
    }
}

// ============================================================================
// Tests
// ============================================================================
