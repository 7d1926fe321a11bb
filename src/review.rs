use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::llm::{LlmProvider, extract_json, truncate};
use crate::models::{Application, Listing, ListingStatus};

/// Revision responses carry both documents separated by this marker.
const SPLIT_MARKER: &str = "---SPLIT---";

const DESCRIPTION_BUDGET: usize = 10_000;
const REVIEW_DESCRIPTION_BUDGET: usize = 5_000;
const RESUME_BUDGET: usize = 5_000;
const COVER_LETTER_BUDGET: usize = 3_000;
const RESUME_CONTEXT_BUDGET: usize = 2_000;

const RESUME_SYSTEM_PROMPT: &str = "You are an expert resume writer. Generate a TAILORED resume \
for a specific job using ONLY facts from the master source material.\n\n\
RULES:\n\
1. Do not invent experience. The master source is your database of facts.\n\
2. Select the experience, skills and achievements most relevant to this job.\n\
3. Quantify impact where the source material does.\n\
4. Format strictly in Markdown, two pages at most.";

const COVER_LETTER_SYSTEM_PROMPT: &str = "You are an expert career coach. Write a compelling, \
tailored cover letter for the job below.\n\n\
RULES:\n\
1. Use only facts from the master source material.\n\
2. Personalize the hook and proof points to the job description.\n\
3. Keep the candidate's voice; no generic filler.\n\
4. Format in Markdown.";

const REFINE_SYSTEM_PROMPT: &str = "You are an expert editor. Improve the resume and cover \
letter based on the reviewer feedback provided.\n\
Return the updated resume and cover letter in Markdown, separated by a line containing \
exactly '---SPLIT---'. Return nothing else.";

#[derive(Debug, Deserialize)]
struct ReviewJudgment {
    score: f64,
    #[serde(default)]
    feedback: String,
}

/// The draft-review loop: create application materials for listings that
/// cleared the fit gate, then critique and revise them under a bounded
/// iteration budget. The loop always terminates; materials that never
/// reach the bar still go to the human carrying their best score.
pub struct DraftReviewLoop<'a> {
    db: &'a Database,
    provider: &'a dyn LlmProvider,
    master_source: &'a str,
    config: &'a Config,
}

impl<'a> DraftReviewLoop<'a> {
    pub fn new(
        db: &'a Database,
        provider: &'a dyn LlmProvider,
        master_source: &'a str,
        config: &'a Config,
    ) -> Self {
        Self { db, provider, master_source, config }
    }

    /// Drafting pass: one application per scored listing above threshold
    /// that has none yet. A failed draft leaves the listing `analyzed`
    /// for the next cycle.
    pub fn run_drafting(&self) -> Result<usize> {
        let listings = self.db.listings_ready_to_draft(self.config.min_fit_score)?;
        info!("drafting materials for {} listings", listings.len());

        let mut drafted = 0;
        for listing in &listings {
            match self.draft_application(listing) {
                Ok(id) => {
                    info!("drafted application {id} for {} / {}", listing.company, listing.role);
                    drafted += 1;
                }
                Err(e) => warn!("drafting failed for {}: {e:#}", listing.key),
            }
        }
        Ok(drafted)
    }

    /// Review pass over every drafted application.
    pub fn run_review(&self) -> Result<usize> {
        let pending = self.db.drafted_applications()?;
        info!("reviewing {} applications", pending.len());

        for (app, listing) in &pending {
            if let Err(e) = self.review_application(app, listing) {
                warn!("review failed for application {}: {e:#}", app.id);
            }
        }
        Ok(pending.len())
    }

    fn draft_application(&self, listing: &Listing) -> Result<String> {
        let resume = self.generate_resume(listing)?;
        let cover_letter = self.generate_cover_letter(listing, &resume)?;
        let (resume_path, cover_letter_path) =
            self.write_artifacts(listing, &resume, &cover_letter)?;

        let id = self.db.create_application(
            &listing.key,
            &resume,
            &cover_letter,
            resume_path.to_str(),
            cover_letter_path.to_str(),
        )?;
        self.db.advance_listing(&listing.key, ListingStatus::Drafted)?;
        self.db.audit(Some(&listing.key), "drafted", &id)?;
        Ok(id)
    }

    /// Critique-and-revise for one application. Aggregate score is the
    /// unweighted mean over personas; revision happens while the score is
    /// below the approval bar and the attempt budget remains. Progress is
    /// persisted after each round so an interrupted loop resumes from the
    /// last materials.
    pub fn review_application(&self, app: &Application, listing: &Listing) -> Result<()> {
        let mut resume = app.resume.clone();
        let mut cover_letter = app.cover_letter.clone();

        let (mut score, mut feedback) = self.review_once(listing, &resume, &cover_letter);
        let mut attempts = 0u32;

        while score < self.config.min_approval_score && attempts < self.config.max_refine_rounds {
            info!(
                "application {} scored {score:.1} < {}, revising (attempt {})",
                app.id,
                self.config.min_approval_score,
                attempts + 1
            );

            match self.revise(listing, &resume, &cover_letter, &feedback) {
                Ok(response) => match split_revision(&response) {
                    Some((new_resume, new_cover_letter)) => {
                        resume = new_resume;
                        cover_letter = new_cover_letter;
                    }
                    // Malformed output keeps the previous materials; the
                    // attempt still counts so the loop cannot spin.
                    None => warn!(
                        "revision for {} did not split into two sections, keeping materials",
                        app.id
                    ),
                },
                Err(e) => warn!("revision failed for {}: {e:#}, keeping materials", app.id),
            }
            attempts += 1;

            let (new_score, new_feedback) = self.review_once(listing, &resume, &cover_letter);
            score = new_score;
            feedback = new_feedback;
            self.db
                .update_materials(&app.id, &resume, &cover_letter, score, &feedback)?;
        }

        self.db
            .finish_review(&app.id, &resume, &cover_letter, score, &feedback)?;
        self.db.audit(
            Some(&listing.key),
            "reviewed",
            &format!("{score:.1} after {attempts} revision(s)"),
        )?;
        info!("application {} reviewed: {score:.1}", app.id);
        Ok(())
    }

    fn review_once(&self, listing: &Listing, resume: &str, cover_letter: &str) -> (f64, String) {
        let mut scores = Vec::new();
        let mut notes = Vec::new();

        for persona in &self.config.personas {
            match self.persona_review(persona, listing, resume, cover_letter) {
                Ok(judgment) => {
                    scores.push(judgment.score.clamp(0.0, 100.0));
                    notes.push(format!("**{persona}**: {}", judgment.feedback));
                }
                Err(e) => {
                    warn!("{persona} review failed for {}: {e:#}", listing.key);
                    scores.push(0.0);
                    notes.push(format!("**{persona}**: review failed: {e:#}"));
                }
            }
        }

        let mean = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        (mean, notes.join("\n\n"))
    }

    fn persona_review(
        &self,
        persona: &str,
        listing: &Listing,
        resume: &str,
        cover_letter: &str,
    ) -> Result<ReviewJudgment> {
        let system = format!(
            "You are a {persona} reviewing a job application.\n\n\
             Critique the resume and cover letter against the job description.\n\n\
             Scoring criteria (0-100):\n\
             - Below 70: Reject. Major gaps, typos, or irrelevance.\n\
             - 70-89: Good. Solid match, but could be sharper.\n\
             - 90-100: Excellent. Tight tailoring, compelling narrative, clear impact.\n\n\
             Return ONLY a JSON object: {{\"score\": number, \"feedback\": \"specific, actionable feedback\"}}"
        );
        let user = format!(
            "JOB DESCRIPTION:\nCompany: {}\nRole: {}\nDescription: {}\n\nRESUME:\n{}\n\nCOVER LETTER:\n{}\n\nReview as a {persona}.",
            listing.company,
            listing.role,
            truncate(&listing.description, REVIEW_DESCRIPTION_BUDGET),
            truncate(resume, RESUME_BUDGET),
            truncate(cover_letter, COVER_LETTER_BUDGET),
        );
        let response = self
            .provider
            .complete(&system, &user, self.config.llm.max_tokens)?;
        extract_json(&response)
    }

    fn generate_resume(&self, listing: &Listing) -> Result<String> {
        let user = format!(
            "MASTER SOURCE MATERIAL:\n{}\n\nTARGET JOB:\nCompany: {}\nRole: {}\nDescription: {}\n\nGenerate the tailored resume in Markdown.",
            self.master_source,
            listing.company,
            listing.role,
            truncate(&listing.description, DESCRIPTION_BUDGET),
        );
        self.provider
            .complete(RESUME_SYSTEM_PROMPT, &user, self.config.llm.max_tokens)
    }

    fn generate_cover_letter(&self, listing: &Listing, resume: &str) -> Result<String> {
        let user = format!(
            "MASTER SOURCE MATERIAL:\n{}\n\nGENERATED RESUME CONTEXT:\n{}\n\nTARGET JOB:\nCompany: {}\nRole: {}\nDescription: {}\n\nGenerate the tailored cover letter in Markdown.",
            self.master_source,
            truncate(resume, RESUME_CONTEXT_BUDGET),
            listing.company,
            listing.role,
            truncate(&listing.description, REVIEW_DESCRIPTION_BUDGET),
        );
        self.provider
            .complete(COVER_LETTER_SYSTEM_PROMPT, &user, self.config.llm.max_tokens)
    }

    fn revise(
        &self,
        listing: &Listing,
        resume: &str,
        cover_letter: &str,
        feedback: &str,
    ) -> Result<String> {
        let user = format!(
            "JOB: {} - {}\n\nFEEDBACK:\n{}\n\nCURRENT RESUME:\n{}\n\nCURRENT COVER LETTER:\n{}\n\nRefine both documents.",
            listing.company, listing.role, feedback, resume, cover_letter,
        );
        self.provider
            .complete(REFINE_SYSTEM_PROMPT, &user, self.config.llm.max_tokens)
    }

    /// Write both documents under the storage directory and return their
    /// paths; the application row keeps them so nothing ever has to go
    /// hunting through the filesystem.
    fn write_artifacts(
        &self,
        listing: &Listing,
        resume: &str,
        cover_letter: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let resumes_dir = self.config.storage_dir.join("resumes");
        let cover_letters_dir = self.config.storage_dir.join("cover_letters");
        fs::create_dir_all(&resumes_dir).context("Failed to create resumes directory")?;
        fs::create_dir_all(&cover_letters_dir)
            .context("Failed to create cover_letters directory")?;

        let safe_company: String = listing
            .company
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{safe_company}_{}_{stamp}", listing.key);

        let resume_path = resumes_dir.join(format!("{base}_resume.md"));
        let cover_letter_path = cover_letters_dir.join(format!("{base}_cover_letter.md"));
        fs::write(&resume_path, resume)
            .with_context(|| format!("Failed to write {}", resume_path.display()))?;
        fs::write(&cover_letter_path, cover_letter)
            .with_context(|| format!("Failed to write {}", cover_letter_path.display()))?;

        Ok((resume_path, cover_letter_path))
    }
}

/// A well-formed revision holds exactly two non-empty sections.
pub fn split_revision(response: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = response.split(SPLIT_MARKER).collect();
    if parts.len() != 2 {
        return None;
    }
    let resume = parts[0].trim();
    let cover_letter = parts[1].trim();
    if resume.is_empty() || cover_letter.is_empty() {
        return None;
    }
    Some((resume.to_string(), cover_letter.to_string()))
}
