use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::llm::{LlmProvider, extract_json, truncate};
use crate::models::Listing;

const DESCRIPTION_BUDGET: usize = 10_000;
const PROFILE_BUDGET: usize = 8_000;

const FIT_SYSTEM_PROMPT: &str = "You are a career strategist. Analyze a job listing against a \
candidate's profile and assign a fit score from 0 to 100.\n\n\
Scoring criteria:\n\
- 90-100: Perfect match. The role needs this candidate's specific mix of skills.\n\
- 75-89: Strong match. Most requirements met, good narrative alignment.\n\
- 60-74: Moderate match. Some gaps, or the role is generic.\n\
- Below 60: Poor match. Irrelevant, or requires skills the candidate clearly lacks.\n\n\
Return ONLY a JSON object:\n\
{\n\
  \"score\": number,\n\
  \"reasoning\": \"string\",\n\
  \"matched_narrative\": \"name of the best fitting narrative from the profile\",\n\
  \"gaps\": [\"missing skills or requirements\"],\n\
  \"strengths\": [\"strong matches\"]\n\
}";

#[derive(Debug, Deserialize)]
pub struct FitJudgment {
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub matched_narrative: String,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

/// Scores `new` listings against the candidate profile and advances them
/// to `analyzed`. A failed judgment scores 0 and records the failure in
/// the rationale instead of aborting the batch.
pub struct FitGate<'a> {
    db: &'a Database,
    provider: &'a dyn LlmProvider,
    profile: &'a str,
    config: &'a Config,
}

impl<'a> FitGate<'a> {
    pub fn new(
        db: &'a Database,
        provider: &'a dyn LlmProvider,
        profile: &'a str,
        config: &'a Config,
    ) -> Self {
        Self { db, provider, profile, config }
    }

    /// One scoring pass over the trailing discovery window.
    pub fn run(&self) -> Result<usize> {
        let listings = self.db.recent_new_listings(
            self.config.discovery_window_days,
            self.config.discovery_batch_limit,
        )?;
        info!("scoring {} listings", listings.len());

        for listing in &listings {
            self.score(listing)?;
        }
        Ok(listings.len())
    }

    pub fn score(&self, listing: &Listing) -> Result<f64> {
        match self.judge(listing) {
            Ok(judgment) => {
                let score = judgment.score.clamp(0.0, 100.0);
                let rationale = format!(
                    "Narrative: {}\nReasoning: {}\nStrengths: {}\nGaps: {}",
                    judgment.matched_narrative,
                    judgment.reasoning,
                    judgment.strengths.join(", "),
                    judgment.gaps.join(", ")
                );
                self.db.record_fit(&listing.key, score, &rationale)?;
                self.db
                    .audit(Some(&listing.key), "fit_scored", &format!("{score:.1}"))?;
                info!("{}: {} / {} scored {score:.1}", listing.key, listing.company, listing.role);
                Ok(score)
            }
            Err(e) => {
                warn!("fit judgment failed for {}: {e:#}", listing.key);
                let rationale = format!("Fit judgment failed: {e:#}");
                self.db.record_fit(&listing.key, 0.0, &rationale)?;
                self.db.audit(Some(&listing.key), "fit_failed", &rationale)?;
                Ok(0.0)
            }
        }
    }

    fn judge(&self, listing: &Listing) -> Result<FitJudgment> {
        let user = format!(
            "CANDIDATE PROFILE:\n{}\n\nJOB LISTING:\nCompany: {}\nRole: {}\nLocation: {}\nDescription: {}\n\nAnalyze the fit.",
            truncate(self.profile, PROFILE_BUDGET),
            listing.company,
            listing.role,
            listing.location.as_deref().unwrap_or("unspecified"),
            truncate(&listing.description, DESCRIPTION_BUDGET),
        );
        let response = self
            .provider
            .complete(FIT_SYSTEM_PROMPT, &user, self.config.llm.max_tokens)?;
        extract_json(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;
    use crate::models::{ListingStatus, NewListing};

    fn seed_listing(db: &Database, url: &str) -> Listing {
        let key = db
            .insert_listing(&NewListing {
                url: url.to_string(),
                company: "Acme".to_string(),
                role: "Platform Engineer".to_string(),
                description: "Run the platform.".to_string(),
                location: Some("Remote".to_string()),
                employment_type: None,
                source: "web_search".to_string(),
                careers_url: None,
                careers_page_verified: false,
            })
            .unwrap()
            .unwrap();
        db.get_listing(&key).unwrap().unwrap()
    }

    #[test]
    fn test_score_records_judgment_and_advances() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::default();
        let listing = seed_listing(&db, "https://a.com/1");

        let provider = ScriptedProvider::new([
            r#"{"score": 87, "reasoning": "ops background fits",
                "matched_narrative": "Builder",
                "gaps": ["kubernetes"], "strengths": ["rust", "on-call"]}"#,
        ]);
        let gate = FitGate::new(&db, &provider, "narratives: []", &config);

        let score = gate.score(&listing).unwrap();
        assert_eq!(score, 87.0);

        let updated = db.get_listing(&listing.key).unwrap().unwrap();
        assert_eq!(updated.status, ListingStatus::Analyzed);
        assert_eq!(updated.fit_score, Some(87.0));
        let rationale = updated.fit_rationale.unwrap();
        assert!(rationale.contains("Narrative: Builder"));
        assert!(rationale.contains("rust, on-call"));
        assert!(rationale.contains("kubernetes"));
    }

    #[test]
    fn test_malformed_judgment_scores_zero_and_continues() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::default();
        let listing = seed_listing(&db, "https://a.com/2");

        let provider = ScriptedProvider::new(["I am unable to respond in JSON today."]);
        let gate = FitGate::new(&db, &provider, "narratives: []", &config);

        let score = gate.score(&listing).unwrap();
        assert_eq!(score, 0.0);

        let updated = db.get_listing(&listing.key).unwrap().unwrap();
        // Still advances: a structurally failed judgment parks the
        // listing below every threshold rather than retrying forever.
        assert_eq!(updated.status, ListingStatus::Analyzed);
        assert_eq!(updated.fit_score, Some(0.0));
        assert!(updated.fit_rationale.unwrap().contains("Fit judgment failed"));
    }

    #[test]
    fn test_score_is_clamped() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::default();
        let listing = seed_listing(&db, "https://a.com/3");

        let provider = ScriptedProvider::new([r#"{"score": 140, "reasoning": "overenthusiastic"}"#]);
        let gate = FitGate::new(&db, &provider, "", &config);
        assert_eq!(gate.score(&listing).unwrap(), 100.0);
    }

    #[test]
    fn test_run_scores_whole_batch_despite_failures() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::default();
        seed_listing(&db, "https://a.com/4");
        seed_listing(&db, "https://a.com/5");

        let provider = ScriptedProvider::new([
            r#"{"score": 70, "reasoning": "fine"}"#,
            "not json at all",
        ]);
        let gate = FitGate::new(&db, &provider, "", &config);

        let scored = gate.run().unwrap();
        assert_eq!(scored, 2);
        assert!(db.recent_new_listings(15, 20).unwrap().is_empty());

        let analyzed = db.list_listings(Some(ListingStatus::Analyzed)).unwrap();
        assert_eq!(analyzed.len(), 2);
    }
}
