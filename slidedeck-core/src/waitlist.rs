//! Waitlist signup: field validation, honeypot filtering and a single form POST.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

pub const NAME_REQUIRED: &str = "Please enter your name.";
pub const EMAIL_INVALID: &str = "Enter a valid email address.";
pub const SUBMISSION_FAILED: &str = "Submission failed. Please try again.";
pub const NETWORK_ERROR: &str = "Network error. Please check your connection and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Name,
    Email,
    Consent,
}

/// Field-level messages. `Consent` has no text; the host moves focus to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<Field, &'static str>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn message(&self, field: Field) -> Option<&'static str> {
        self.fields.get(&field).copied()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.keys().copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitlistForm {
    pub action: String,
    pub name: String,
    pub email: String,
    /// `None` when the form has no consent checkbox.
    pub consent: Option<bool>,
    /// Honeypot field. Humans leave it empty.
    pub gotcha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Invalid(ValidationErrors),
    /// Honeypot was filled: shown as success, nothing is sent.
    Dropped,
    Accepted,
    Rejected { message: String },
    NetworkError { message: String },
}

impl SubmitOutcome {
    /// Whether the host should show the success banner and reset the form.
    pub fn shows_success(&self) -> bool {
        matches!(self, Self::Dropped | Self::Accepted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait::async_trait]
pub trait FormTransport: Send + Sync {
    async fn post_form(
        &self,
        action: &str,
        fields: &[(String, String)],
    ) -> Result<TransportResponse>;
}

impl WaitlistForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();
        if self.name.trim().is_empty() {
            errors.fields.insert(Field::Name, NAME_REQUIRED);
        }
        if !is_valid_email(self.email.trim()) {
            errors.fields.insert(Field::Email, EMAIL_INVALID);
        }
        if self.consent == Some(false) {
            errors.fields.insert(Field::Consent, "");
        }
        errors
    }

    pub fn is_spam(&self) -> bool {
        !self.gotcha.trim().is_empty()
    }

    fn encoded_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("name".to_owned(), self.name.clone()),
            ("email".to_owned(), self.email.clone()),
        ];
        if self.consent == Some(true) {
            fields.push(("consent".to_owned(), "on".to_owned()));
        }
        fields.push(("_gotcha".to_owned(), self.gotcha.clone()));
        fields
    }

    #[instrument(skip(self, transport), fields(action = %self.action))]
    pub async fn submit<T>(&self, transport: &T) -> SubmitOutcome
    where
        T: FormTransport + ?Sized,
    {
        let errors = self.validate();
        if !errors.is_empty() {
            return SubmitOutcome::Invalid(errors);
        }
        if self.is_spam() {
            info!("honeypot filled; dropping submission");
            return SubmitOutcome::Dropped;
        }

        match transport.post_form(&self.action, &self.encoded_fields()).await {
            Ok(response) if response.is_success() => SubmitOutcome::Accepted,
            Ok(response) => {
                warn!(status = response.status, "waitlist submission rejected");
                SubmitOutcome::Rejected {
                    message: format!("{SUBMISSION_FAILED}\n\n{}", response.body),
                }
            }
            Err(err) => {
                warn!(error = ?err, "waitlist submission failed");
                SubmitOutcome::NetworkError {
                    message: NETWORK_ERROR.to_owned(),
                }
            }
        }
    }
}

/// `local@domain.tld`: no whitespace, exactly one `@`, and a dot inside the
/// domain followed by at least two characters.
pub fn is_valid_email(candidate: &str) -> bool {
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(at, c)| c == '.' && at > 0 && domain[at + 1..].chars().count() >= 2)
}

/// Posts urlencoded forms with `ureq` on the blocking pool.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Arc<ureq::Agent>,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent: Arc::new(agent),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait::async_trait]
impl FormTransport for UreqTransport {
    async fn post_form(
        &self,
        action: &str,
        fields: &[(String, String)],
    ) -> Result<TransportResponse> {
        let agent = Arc::clone(&self.agent);
        let action = action.to_owned();
        let fields = fields.to_vec();

        tokio::task::spawn_blocking(move || {
            let pairs: Vec<(&str, &str)> = fields
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            let request = agent.post(&action).set("Accept", "application/json");
            let response = match request.send_form(&pairs) {
                Ok(response) => response,
                Err(ureq::Error::Status(_, response)) => response,
                Err(err) => return Err(anyhow::anyhow!("POST {action} failed: {err}")),
            };
            let status = response.status();
            let body = response
                .into_string()
                .with_context(|| format!("failed to read response from {action}"))?;
            Ok(TransportResponse { status, body })
        })
        .await
        .context("form submission task panicked")?
    }
}
