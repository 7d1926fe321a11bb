use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use crate::models::{
    Application, ApplicationStatus, AuditEntry, CareersCacheEntry, Listing, ListingStatus,
    NewListing, application_id, listing_key,
};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "legwork") {
            Ok(proj_dirs.data_dir().join("legwork.db"))
        } else {
            Ok(PathBuf::from("legwork.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                key TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                company TEXT NOT NULL,
                role TEXT NOT NULL,
                description TEXT NOT NULL,
                location TEXT,
                employment_type TEXT,
                source TEXT,
                careers_url TEXT,
                careers_page_verified INTEGER NOT NULL DEFAULT 0,
                fit_score REAL,
                fit_rationale TEXT,
                status TEXT NOT NULL DEFAULT 'new'
                    CHECK (status IN ('new', 'analyzed', 'drafted', 'reviewed', 'submitted', 'user_rejected')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                listing_key TEXT NOT NULL UNIQUE REFERENCES listings(key),
                status TEXT NOT NULL DEFAULT 'drafted'
                    CHECK (status IN ('drafted', 'reviewed', 'submitted', 'user_rejected')),
                resume TEXT NOT NULL,
                cover_letter TEXT NOT NULL,
                resume_path TEXT,
                cover_letter_path TEXT,
                review_score REAL NOT NULL DEFAULT 0,
                feedback TEXT,
                user_approved INTEGER NOT NULL DEFAULT 0,
                submitted_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS careers_cache (
                company TEXT PRIMARY KEY,
                careers_url TEXT NOT NULL,
                is_valid INTEGER NOT NULL,
                note TEXT,
                last_verified TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_key TEXT,
                action TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status);
            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            CREATE INDEX IF NOT EXISTS idx_audit_listing ON audit_log(listing_key);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='listings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'legwork init' first."));
        }
        Ok(())
    }

    // --- Listing operations ---

    /// Insert a discovered listing. Returns the new key, or `None` when a
    /// listing with the same URL already exists -- re-discovery is a
    /// defined no-op, not an error.
    pub fn insert_listing(&self, new: &NewListing) -> Result<Option<String>> {
        if self.listing_for_url(&new.url)?.is_some() {
            return Ok(None);
        }

        let key = listing_key(&new.url);
        let result = self.conn.execute(
            "INSERT INTO listings (key, url, company, role, description, location,
                                   employment_type, source, careers_url, careers_page_verified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                key,
                new.url,
                new.company,
                new.role,
                new.description,
                new.location,
                new.employment_type,
                new.source,
                new.careers_url,
                new.careers_page_verified,
            ],
        );

        match result {
            Ok(_) => Ok(Some(key)),
            // Backstop for a concurrent insert of the same URL: the unique
            // constraint makes the second writer a no-op too.
            Err(e) if is_constraint_violation(&e) => Ok(None),
            Err(e) => Err(e).context("Failed to insert listing"),
        }
    }

    pub fn get_listing(&self, key: &str) -> Result<Option<Listing>> {
        self.conn
            .query_row(
                &format!("SELECT {LISTING_COLS} FROM listings WHERE key = ?1"),
                [key],
                |row| Self::row_to_listing(row, 0),
            )
            .optional()
            .context("Failed to load listing")
    }

    pub fn listing_for_url(&self, url: &str) -> Result<Option<Listing>> {
        self.conn
            .query_row(
                &format!("SELECT {LISTING_COLS} FROM listings WHERE url = ?1"),
                [url],
                |row| Self::row_to_listing(row, 0),
            )
            .optional()
            .context("Failed to look up listing by url")
    }

    pub fn list_listings(&self, status: Option<ListingStatus>) -> Result<Vec<Listing>> {
        let mut sql = format!("SELECT {LISTING_COLS} FROM listings");
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY created_at DESC, key");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s.as_str()], |row| Self::row_to_listing(row, 0))?
                .collect::<Result<Vec<_>, _>>()
        } else {
            stmt.query_map([], |row| Self::row_to_listing(row, 0))?
                .collect::<Result<Vec<_>, _>>()
        };

        rows.context("Failed to list listings")
    }

    /// Unscored listings from the trailing discovery window, newest first.
    pub fn recent_new_listings(&self, window_days: i64, limit: usize) -> Result<Vec<Listing>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(window_days))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LISTING_COLS} FROM listings
             WHERE status = 'new' AND created_at > ?1
             ORDER BY created_at DESC, key
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![cutoff, limit as i64], |row| {
            Self::row_to_listing(row, 0)
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to select recent listings")
    }

    /// Scored listings above the fit threshold that have no application yet,
    /// best fit first.
    pub fn listings_ready_to_draft(&self, min_fit: f64) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM listings l
             LEFT JOIN applications a ON a.listing_key = l.key
             WHERE l.status = 'analyzed' AND l.fit_score >= ?1 AND a.id IS NULL
             ORDER BY l.fit_score DESC, l.key",
            listing_cols_prefixed("l")
        ))?;
        let rows = stmt.query_map(params![min_fit], |row| Self::row_to_listing(row, 0))?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to select listings ready to draft")
    }

    /// Record a fit judgment and advance the listing to `analyzed`.
    pub fn record_fit(&self, key: &str, score: f64, rationale: &str) -> Result<()> {
        let listing = self
            .get_listing(key)?
            .ok_or_else(|| anyhow!("Listing {} not found", key))?;
        if !listing.status.can_advance_to(ListingStatus::Analyzed) {
            return Err(anyhow!(
                "Illegal listing transition {} -> analyzed for {}",
                listing.status,
                key
            ));
        }
        self.conn.execute(
            "UPDATE listings
             SET fit_score = ?1, fit_rationale = ?2, status = 'analyzed', updated_at = datetime('now')
             WHERE key = ?3",
            params![score, rationale, key],
        )?;
        Ok(())
    }

    /// Advance a listing one step. Refuses skips and regressions.
    pub fn advance_listing(&self, key: &str, next: ListingStatus) -> Result<()> {
        let listing = self
            .get_listing(key)?
            .ok_or_else(|| anyhow!("Listing {} not found", key))?;
        if !listing.status.can_advance_to(next) {
            return Err(anyhow!(
                "Illegal listing transition {} -> {} for {}",
                listing.status,
                next,
                key
            ));
        }
        self.conn.execute(
            "UPDATE listings SET status = ?1, updated_at = datetime('now') WHERE key = ?2",
            params![next.as_str(), key],
        )?;
        Ok(())
    }

    // --- Application operations ---

    /// Create the application for a listing. At most one per listing; the
    /// listing must already be scored.
    pub fn create_application(
        &self,
        listing_key: &str,
        resume: &str,
        cover_letter: &str,
        resume_path: Option<&str>,
        cover_letter_path: Option<&str>,
    ) -> Result<String> {
        let listing = self
            .get_listing(listing_key)?
            .ok_or_else(|| anyhow!("Listing {} not found", listing_key))?;
        if listing.status == ListingStatus::New {
            return Err(anyhow!(
                "Listing {} has not been scored; cannot create application",
                listing_key
            ));
        }
        if self.application_for_listing(listing_key)?.is_some() {
            return Err(anyhow!("Application already exists for listing {}", listing_key));
        }

        let id = application_id();
        self.conn
            .execute(
                "INSERT INTO applications (id, listing_key, resume, cover_letter, resume_path, cover_letter_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, listing_key, resume, cover_letter, resume_path, cover_letter_path],
            )
            .context("Failed to create application")?;
        Ok(id)
    }

    pub fn get_application(&self, id: &str) -> Result<Option<Application>> {
        self.conn
            .query_row(
                &format!("SELECT {APPLICATION_COLS} FROM applications WHERE id = ?1"),
                [id],
                |row| Self::row_to_application(row, 0),
            )
            .optional()
            .context("Failed to load application")
    }

    pub fn application_for_listing(&self, listing_key: &str) -> Result<Option<Application>> {
        self.conn
            .query_row(
                &format!("SELECT {APPLICATION_COLS} FROM applications WHERE listing_key = ?1"),
                [listing_key],
                |row| Self::row_to_application(row, 0),
            )
            .optional()
            .context("Failed to load application for listing")
    }

    /// Applications awaiting review, oldest first.
    pub fn drafted_applications(&self) -> Result<Vec<(Application, Listing)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, {} FROM applications a
             JOIN listings l ON l.key = a.listing_key
             WHERE a.status = 'drafted'
             ORDER BY a.created_at, a.id",
            application_cols_prefixed("a"),
            listing_cols_prefixed("l")
        ))?;
        let rows = stmt.query_map([], Self::row_to_pair)?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to select drafted applications")
    }

    /// Applications that cleared review, highest listing fit first.
    pub fn pending_approvals(&self) -> Result<Vec<(Application, Listing)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, {} FROM applications a
             JOIN listings l ON l.key = a.listing_key
             WHERE a.status = 'reviewed'
             ORDER BY l.fit_score DESC, a.id",
            application_cols_prefixed("a"),
            listing_cols_prefixed("l")
        ))?;
        let rows = stmt.query_map([], Self::row_to_pair)?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to select pending approvals")
    }

    /// In-place revision inside the refinement loop: materials, score and
    /// feedback change, status does not.
    pub fn update_materials(
        &self,
        id: &str,
        resume: &str,
        cover_letter: &str,
        score: f64,
        feedback: &str,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications
             SET resume = ?1, cover_letter = ?2, review_score = ?3, feedback = ?4,
                 updated_at = datetime('now')
             WHERE id = ?5",
            params![resume, cover_letter, score, feedback, id],
        )?;
        if changed == 0 {
            return Err(anyhow!("Application {} not found", id));
        }
        Ok(())
    }

    /// Close out a review pass: persist final materials and move the
    /// application and its listing to `reviewed`.
    pub fn finish_review(
        &self,
        id: &str,
        resume: &str,
        cover_letter: &str,
        score: f64,
        feedback: &str,
    ) -> Result<()> {
        let app = self
            .get_application(id)?
            .ok_or_else(|| anyhow!("Application {} not found", id))?;
        self.advance_application(&app, ApplicationStatus::Reviewed)?;
        self.conn.execute(
            "UPDATE applications
             SET resume = ?1, cover_letter = ?2, review_score = ?3, feedback = ?4,
                 updated_at = datetime('now')
             WHERE id = ?5",
            params![resume, cover_letter, score, feedback, id],
        )?;
        self.advance_listing(&app.listing_key, ListingStatus::Reviewed)?;
        Ok(())
    }

    /// Human approval: the application was submitted by the operator.
    pub fn mark_submitted(&self, id: &str) -> Result<()> {
        let app = self
            .get_application(id)?
            .ok_or_else(|| anyhow!("Application {} not found", id))?;
        self.advance_application(&app, ApplicationStatus::Submitted)?;
        self.conn.execute(
            "UPDATE applications
             SET user_approved = 1, submitted_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?1",
            params![id],
        )?;
        self.advance_listing(&app.listing_key, ListingStatus::Submitted)?;
        Ok(())
    }

    /// Human rejection of a reviewed application.
    pub fn mark_user_rejected(&self, id: &str) -> Result<()> {
        let app = self
            .get_application(id)?
            .ok_or_else(|| anyhow!("Application {} not found", id))?;
        self.advance_application(&app, ApplicationStatus::UserRejected)?;
        self.advance_listing(&app.listing_key, ListingStatus::UserRejected)?;
        Ok(())
    }

    fn advance_application(&self, app: &Application, next: ApplicationStatus) -> Result<()> {
        if !app.status.can_advance_to(next) {
            return Err(anyhow!(
                "Illegal application transition {} -> {} for {}",
                app.status,
                next,
                app.id
            ));
        }
        self.conn.execute(
            "UPDATE applications SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![next.as_str(), app.id],
        )?;
        Ok(())
    }

    // --- Careers cache ---

    pub fn cached_careers(&self, company: &str) -> Result<Option<CareersCacheEntry>> {
        self.conn
            .query_row(
                "SELECT company, careers_url, is_valid, note, last_verified
                 FROM careers_cache WHERE company = ?1",
                [company],
                |row| {
                    Ok(CareersCacheEntry {
                        company: row.get(0)?,
                        careers_url: row.get(1)?,
                        is_valid: row.get(2)?,
                        note: row.get(3)?,
                        last_verified: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to read careers cache")
    }

    /// Upsert the careers locator for a company. An empty URL with
    /// `is_valid = false` records a negative result.
    pub fn cache_careers(
        &self,
        company: &str,
        careers_url: &str,
        is_valid: bool,
        note: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO careers_cache (company, careers_url, is_valid, note, last_verified)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(company) DO UPDATE SET
                 careers_url = excluded.careers_url,
                 is_valid = excluded.is_valid,
                 note = excluded.note,
                 last_verified = excluded.last_verified",
            params![company, careers_url, is_valid, note],
        )?;
        Ok(())
    }

    // --- Audit log ---

    /// Append-only; never read back by the pipeline itself.
    pub fn audit(&self, listing_key: Option<&str>, action: &str, detail: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log (listing_key, action, detail) VALUES (?1, ?2, ?3)",
            params![listing_key, action, detail],
        )?;
        Ok(())
    }

    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, listing_key, action, detail, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                listing_key: row.get(1)?,
                action: row.get(2)?,
                detail: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read audit log")
    }

    // --- Row mappers ---

    fn row_to_listing(row: &Row, base: usize) -> rusqlite::Result<Listing> {
        let status: String = row.get(base + 12)?;
        let status = ListingStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                base + 12,
                rusqlite::types::Type::Text,
                format!("unknown listing status '{status}'").into(),
            )
        })?;
        Ok(Listing {
            key: row.get(base)?,
            url: row.get(base + 1)?,
            company: row.get(base + 2)?,
            role: row.get(base + 3)?,
            description: row.get(base + 4)?,
            location: row.get(base + 5)?,
            employment_type: row.get(base + 6)?,
            source: row.get(base + 7)?,
            careers_url: row.get(base + 8)?,
            careers_page_verified: row.get(base + 9)?,
            fit_score: row.get(base + 10)?,
            fit_rationale: row.get(base + 11)?,
            status,
            created_at: row.get(base + 13)?,
            updated_at: row.get(base + 14)?,
        })
    }

    fn row_to_application(row: &Row, base: usize) -> rusqlite::Result<Application> {
        let status: String = row.get(base + 2)?;
        let status = ApplicationStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                base + 2,
                rusqlite::types::Type::Text,
                format!("unknown application status '{status}'").into(),
            )
        })?;
        Ok(Application {
            id: row.get(base)?,
            listing_key: row.get(base + 1)?,
            status,
            resume: row.get(base + 3)?,
            cover_letter: row.get(base + 4)?,
            resume_path: row.get(base + 5)?,
            cover_letter_path: row.get(base + 6)?,
            review_score: row.get(base + 7)?,
            feedback: row.get(base + 8)?,
            user_approved: row.get(base + 9)?,
            submitted_at: row.get(base + 10)?,
            created_at: row.get(base + 11)?,
            updated_at: row.get(base + 12)?,
        })
    }

    fn row_to_pair(row: &Row) -> rusqlite::Result<(Application, Listing)> {
        let app = Self::row_to_application(row, 0)?;
        let listing = Self::row_to_listing(row, APPLICATION_COL_COUNT)?;
        Ok((app, listing))
    }
}

const LISTING_COLS: &str = "key, url, company, role, description, location, employment_type, \
                            source, careers_url, careers_page_verified, fit_score, fit_rationale, \
                            status, created_at, updated_at";

const APPLICATION_COLS: &str = "id, listing_key, status, resume, cover_letter, resume_path, \
                                cover_letter_path, review_score, feedback, user_approved, \
                                submitted_at, created_at, updated_at";

const APPLICATION_COL_COUNT: usize = 13;

fn listing_cols_prefixed(alias: &str) -> String {
    LISTING_COLS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn application_cols_prefixed(alias: &str) -> String {
    APPLICATION_COLS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lead(url: &str) -> NewListing {
        NewListing {
            url: url.to_string(),
            company: "Acme".to_string(),
            role: "Platform Engineer".to_string(),
            description: "Build and run the platform.".to_string(),
            location: Some("Remote".to_string()),
            employment_type: Some("full-time".to_string()),
            source: "web_search".to_string(),
            careers_url: Some("https://acme.com/careers".to_string()),
            careers_page_verified: true,
        }
    }

    #[test]
    fn test_insert_listing_is_idempotent() {
        let db = Database::open_in_memory().unwrap();

        let first = db.insert_listing(&sample_lead("https://acme.com/jobs/1")).unwrap();
        assert!(first.is_some());
        let key = first.unwrap();

        // Second submission of the same URL is a silent no-op.
        let mut changed = sample_lead("https://acme.com/jobs/1");
        changed.company = "Acme Rebranded".to_string();
        let second = db.insert_listing(&changed).unwrap();
        assert!(second.is_none());

        // The original record is untouched.
        let listing = db.get_listing(&key).unwrap().unwrap();
        assert_eq!(listing.company, "Acme");
        assert_eq!(db.list_listings(None).unwrap().len(), 1);
    }

    #[test]
    fn test_listing_key_matches_url_hash() {
        let db = Database::open_in_memory().unwrap();
        let key = db
            .insert_listing(&sample_lead("https://acme.com/jobs/2"))
            .unwrap()
            .unwrap();
        assert_eq!(key, listing_key("https://acme.com/jobs/2"));
    }

    #[test]
    fn test_record_fit_advances_to_analyzed() {
        let db = Database::open_in_memory().unwrap();
        let key = db
            .insert_listing(&sample_lead("https://acme.com/jobs/3"))
            .unwrap()
            .unwrap();

        db.record_fit(&key, 82.5, "Narrative: builder").unwrap();
        let listing = db.get_listing(&key).unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Analyzed);
        assert_eq!(listing.fit_score, Some(82.5));

        // A second scoring pass on the same listing is refused.
        assert!(db.record_fit(&key, 10.0, "again").is_err());
    }

    #[test]
    fn test_advance_listing_rejects_skips_and_regressions() {
        let db = Database::open_in_memory().unwrap();
        let key = db
            .insert_listing(&sample_lead("https://acme.com/jobs/4"))
            .unwrap()
            .unwrap();

        assert!(db.advance_listing(&key, ListingStatus::Drafted).is_err());
        assert!(db.advance_listing(&key, ListingStatus::Reviewed).is_err());

        db.record_fit(&key, 70.0, "ok").unwrap();
        assert!(db.advance_listing(&key, ListingStatus::New).is_err());
        db.advance_listing(&key, ListingStatus::Drafted).unwrap();
        db.advance_listing(&key, ListingStatus::Reviewed).unwrap();
        db.advance_listing(&key, ListingStatus::Submitted).unwrap();

        // Terminal.
        assert!(db.advance_listing(&key, ListingStatus::UserRejected).is_err());
    }

    #[test]
    fn test_application_requires_scored_listing_and_is_unique() {
        let db = Database::open_in_memory().unwrap();
        let key = db
            .insert_listing(&sample_lead("https://acme.com/jobs/5"))
            .unwrap()
            .unwrap();

        // Listing still 'new': no application allowed.
        assert!(db.create_application(&key, "r", "c", None, None).is_err());

        db.record_fit(&key, 95.0, "strong").unwrap();
        let id = db.create_application(&key, "resume", "letter", None, None).unwrap();
        assert_eq!(id.len(), 12);

        // At most one application per listing.
        assert!(db.create_application(&key, "r2", "c2", None, None).is_err());

        let app = db.application_for_listing(&key).unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Drafted);
        assert_eq!(app.review_score, 0.0);
    }

    #[test]
    fn test_finish_review_moves_both_records() {
        let db = Database::open_in_memory().unwrap();
        let key = db
            .insert_listing(&sample_lead("https://acme.com/jobs/6"))
            .unwrap()
            .unwrap();
        db.record_fit(&key, 90.0, "strong").unwrap();
        let id = db.create_application(&key, "resume", "letter", None, None).unwrap();
        db.advance_listing(&key, ListingStatus::Drafted).unwrap();

        db.finish_review(&id, "resume v2", "letter v2", 88.0, "**Recruiter**: better")
            .unwrap();

        let app = db.get_application(&id).unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Reviewed);
        assert_eq!(app.resume, "resume v2");
        assert_eq!(app.review_score, 88.0);

        let listing = db.get_listing(&key).unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Reviewed);

        // Reviewing twice is refused.
        assert!(db.finish_review(&id, "x", "y", 1.0, "z").is_err());
    }

    #[test]
    fn test_mark_submitted_and_rejected() {
        let db = Database::open_in_memory().unwrap();

        for (url, submit) in [
            ("https://acme.com/jobs/7", true),
            ("https://acme.com/jobs/8", false),
        ] {
            let key = db.insert_listing(&sample_lead(url)).unwrap().unwrap();
            db.record_fit(&key, 90.0, "strong").unwrap();
            let id = db.create_application(&key, "r", "c", None, None).unwrap();
            db.advance_listing(&key, ListingStatus::Drafted).unwrap();
            db.finish_review(&id, "r", "c", 91.0, "fine").unwrap();

            if submit {
                db.mark_submitted(&id).unwrap();
                let app = db.get_application(&id).unwrap().unwrap();
                assert_eq!(app.status, ApplicationStatus::Submitted);
                assert!(app.user_approved);
                assert!(app.submitted_at.is_some());
                let listing = db.get_listing(&key).unwrap().unwrap();
                assert_eq!(listing.status, ListingStatus::Submitted);
            } else {
                db.mark_user_rejected(&id).unwrap();
                let app = db.get_application(&id).unwrap().unwrap();
                assert_eq!(app.status, ApplicationStatus::UserRejected);
                assert!(!app.user_approved);
                let listing = db.get_listing(&key).unwrap().unwrap();
                assert_eq!(listing.status, ListingStatus::UserRejected);
            }
        }
    }

    #[test]
    fn test_pending_approvals_ordered_by_fit_desc() {
        let db = Database::open_in_memory().unwrap();

        for (url, fit) in [
            ("https://a.com/1", 72.0),
            ("https://a.com/2", 95.0),
            ("https://a.com/3", 81.0),
        ] {
            let key = db.insert_listing(&sample_lead(url)).unwrap().unwrap();
            db.record_fit(&key, fit, "r").unwrap();
            let id = db.create_application(&key, "r", "c", None, None).unwrap();
            db.advance_listing(&key, ListingStatus::Drafted).unwrap();
            db.finish_review(&id, "r", "c", 90.0, "f").unwrap();
        }

        let pending = db.pending_approvals().unwrap();
        let fits: Vec<f64> = pending
            .iter()
            .map(|(_, l)| l.fit_score.unwrap_or_default())
            .collect();
        assert_eq!(fits, vec![95.0, 81.0, 72.0]);
    }

    #[test]
    fn test_recent_new_listings_window_and_limit() {
        let db = Database::open_in_memory().unwrap();

        let fresh = db
            .insert_listing(&sample_lead("https://a.com/fresh"))
            .unwrap()
            .unwrap();
        let stale = db
            .insert_listing(&sample_lead("https://a.com/stale"))
            .unwrap()
            .unwrap();
        db.conn
            .execute(
                "UPDATE listings SET created_at = '2020-01-01 00:00:00' WHERE key = ?1",
                [&stale],
            )
            .unwrap();

        let recent = db.recent_new_listings(15, 20).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].key, fresh);

        let limited = db.recent_new_listings(15, 0).unwrap();
        assert!(limited.is_empty());
    }

    #[test]
    fn test_ready_to_draft_filters_scored_without_application() {
        let db = Database::open_in_memory().unwrap();

        let low = db.insert_listing(&sample_lead("https://a.com/low")).unwrap().unwrap();
        db.record_fit(&low, 40.0, "weak").unwrap();

        let high = db.insert_listing(&sample_lead("https://a.com/high")).unwrap().unwrap();
        db.record_fit(&high, 95.0, "strong").unwrap();

        let taken = db.insert_listing(&sample_lead("https://a.com/taken")).unwrap().unwrap();
        db.record_fit(&taken, 99.0, "strong").unwrap();
        db.create_application(&taken, "r", "c", None, None).unwrap();

        let ready = db.listings_ready_to_draft(60.0).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, high);
    }

    #[test]
    fn test_careers_cache_upsert_and_negative() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.cached_careers("Acme").unwrap().is_none());

        db.cache_careers("Acme", "https://acme.com/careers", true, "pattern match")
            .unwrap();
        let entry = db.cached_careers("Acme").unwrap().unwrap();
        assert_eq!(entry.locator(), Some("https://acme.com/careers"));

        // Upsert replaces in place; still exactly one row.
        db.cache_careers("Acme", "https://jobs.acme.com", true, "domain scan")
            .unwrap();
        let entry = db.cached_careers("Acme").unwrap().unwrap();
        assert_eq!(entry.locator(), Some("https://jobs.acme.com"));
        assert_eq!(entry.note.as_deref(), Some("domain scan"));

        // Negative entries are stored and returned.
        db.cache_careers("Ghost Corp", "", false, "careers url not found")
            .unwrap();
        let entry = db.cached_careers("Ghost Corp").unwrap().unwrap();
        assert!(!entry.is_valid);
        assert_eq!(entry.locator(), None);
    }

    #[test]
    fn test_audit_appends() {
        let db = Database::open_in_memory().unwrap();
        db.audit(Some("abc123"), "discovered", "Acme / Platform Engineer")
            .unwrap();
        db.audit(None, "cycle_started", "").unwrap();

        let entries = db.recent_audit(10).unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first.
        assert_eq!(entries[0].action, "cycle_started");
        assert_eq!(entries[1].listing_key.as_deref(), Some("abc123"));
    }
}
