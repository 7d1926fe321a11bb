use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle of a discovered listing. Transitions are forward-only and
/// one step at a time; both terminals branch from `Reviewed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    New,
    Analyzed,
    Drafted,
    Reviewed,
    Submitted,
    UserRejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::New => "new",
            ListingStatus::Analyzed => "analyzed",
            ListingStatus::Drafted => "drafted",
            ListingStatus::Reviewed => "reviewed",
            ListingStatus::Submitted => "submitted",
            ListingStatus::UserRejected => "user_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(ListingStatus::New),
            "analyzed" => Some(ListingStatus::Analyzed),
            "drafted" => Some(ListingStatus::Drafted),
            "reviewed" => Some(ListingStatus::Reviewed),
            "submitted" => Some(ListingStatus::Submitted),
            "user_rejected" => Some(ListingStatus::UserRejected),
            _ => None,
        }
    }

    pub fn can_advance_to(self, next: ListingStatus) -> bool {
        use ListingStatus::*;
        matches!(
            (self, next),
            (New, Analyzed)
                | (Analyzed, Drafted)
                | (Drafted, Reviewed)
                | (Reviewed, Submitted)
                | (Reviewed, UserRejected)
        )
    }

    #[allow(dead_code)]
    pub fn is_terminal(self) -> bool {
        matches!(self, ListingStatus::Submitted | ListingStatus::UserRejected)
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Drafted,
    Reviewed,
    Submitted,
    UserRejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Drafted => "drafted",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UserRejected => "user_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drafted" => Some(ApplicationStatus::Drafted),
            "reviewed" => Some(ApplicationStatus::Reviewed),
            "submitted" => Some(ApplicationStatus::Submitted),
            "user_rejected" => Some(ApplicationStatus::UserRejected),
            _ => None,
        }
    }

    pub fn can_advance_to(self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Drafted, Reviewed) | (Reviewed, Submitted) | (Reviewed, UserRejected)
        )
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub key: String,
    pub url: String,
    pub company: String,
    pub role: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub source: Option<String>,
    pub careers_url: Option<String>,
    pub careers_page_verified: bool,
    pub fit_score: Option<f64>,
    pub fit_rationale: Option<String>,
    pub status: ListingStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied by the discovery guard when a lead is accepted.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub url: String,
    pub company: String,
    pub role: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub source: String,
    pub careers_url: Option<String>,
    pub careers_page_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub listing_key: String,
    pub status: ApplicationStatus,
    pub resume: String,
    pub cover_letter: String,
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
    pub review_score: f64,
    pub feedback: Option<String>,
    pub user_approved: bool,
    pub submitted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareersCacheEntry {
    pub company: String,
    /// Empty string is a cached negative.
    pub careers_url: String,
    pub is_valid: bool,
    pub note: Option<String>,
    pub last_verified: String,
}

impl CareersCacheEntry {
    /// The usable locator, if any. A negative entry yields `None` but
    /// still short-circuits further lookup.
    pub fn locator(&self) -> Option<&str> {
        if self.is_valid && !self.careers_url.is_empty() {
            Some(&self.careers_url)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub listing_key: Option<String>,
    pub action: String,
    pub detail: Option<String>,
    pub created_at: String,
}

/// Listing identity: first 12 hex chars of SHA-256 of the source URL.
/// A pure function of the URL, so re-discovering the same posting always
/// lands on the same key.
pub fn listing_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Opaque application id: 12-char prefix of a v4 UUID.
pub fn application_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_key_is_deterministic() {
        let a = listing_key("https://example.com/jobs/42");
        let b = listing_key("https://example.com/jobs/42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_listing_key_differs_per_url() {
        assert_ne!(
            listing_key("https://example.com/jobs/42"),
            listing_key("https://example.com/jobs/43")
        );
    }

    #[test]
    fn test_application_id_shape() {
        let id = application_id();
        assert_eq!(id.len(), 12);
        assert_ne!(id, application_id());
    }

    #[test]
    fn test_listing_status_round_trip() {
        for status in [
            ListingStatus::New,
            ListingStatus::Analyzed,
            ListingStatus::Drafted,
            ListingStatus::Reviewed,
            ListingStatus::Submitted,
            ListingStatus::UserRejected,
        ] {
            assert_eq!(ListingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ListingStatus::parse("bogus"), None);
    }

    #[test]
    fn test_listing_status_advances_one_step_forward_only() {
        use ListingStatus::*;
        assert!(New.can_advance_to(Analyzed));
        assert!(Analyzed.can_advance_to(Drafted));
        assert!(Drafted.can_advance_to(Reviewed));
        assert!(Reviewed.can_advance_to(Submitted));
        assert!(Reviewed.can_advance_to(UserRejected));

        // No skipping
        assert!(!New.can_advance_to(Drafted));
        assert!(!New.can_advance_to(Reviewed));
        assert!(!Analyzed.can_advance_to(Reviewed));
        assert!(!Drafted.can_advance_to(Submitted));

        // No regression
        assert!(!Analyzed.can_advance_to(New));
        assert!(!Reviewed.can_advance_to(Drafted));
        assert!(!Submitted.can_advance_to(Reviewed));

        // Terminals are terminal
        assert!(!Submitted.can_advance_to(UserRejected));
        assert!(!UserRejected.can_advance_to(Submitted));
        assert!(Submitted.is_terminal());
        assert!(UserRejected.is_terminal());
    }

    #[test]
    fn test_application_status_transitions() {
        use ApplicationStatus::*;
        assert!(Drafted.can_advance_to(Reviewed));
        assert!(Reviewed.can_advance_to(Submitted));
        assert!(Reviewed.can_advance_to(UserRejected));
        assert!(!Drafted.can_advance_to(Submitted));
        assert!(!Submitted.can_advance_to(Reviewed));
    }

    #[test]
    fn test_cache_entry_locator() {
        let positive = CareersCacheEntry {
            company: "Acme".to_string(),
            careers_url: "https://acme.com/careers".to_string(),
            is_valid: true,
            note: None,
            last_verified: "2026-01-01 00:00:00".to_string(),
        };
        assert_eq!(positive.locator(), Some("https://acme.com/careers"));

        let negative = CareersCacheEntry {
            company: "Ghost Corp".to_string(),
            careers_url: String::new(),
            is_valid: false,
            note: Some("careers url not found".to_string()),
            last_verified: "2026-01-01 00:00:00".to_string(),
        };
        assert_eq!(negative.locator(), None);
    }
}
