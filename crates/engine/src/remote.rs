//! Remote transport
//!
//! Replication to a configured remote, pushing both the branch refs and the
//! notes ref with force semantics. The wired transport is `file://` (a bare
//! sibling repository reached through the filesystem); `ssh://` and
//! `https://` URLs parse, initialize their session layer lazily once per
//! process, and report `RemoteError(Unsupported)` until a network transport
//! is linked into the build.
//!
//! Push outcomes: `Pushed | Skipped | Deferred | Failed`. Pushes are skipped
//! when disabled, deferred inside a batch scope (flushed once at scope
//! exit), and a failure never affects local state. A failed notes push
//! degrades the outcome to `Pushed { notes_pushed: false }` rather than
//! failing the push; fetch treats missing notes the same way.

use crate::branch::is_ancestor;
use crate::database::Database;
use chrondb_core::{ChronError, ChronResult, ObjectId, RemoteConfig, RemoteErrorKind};
use chrondb_storage::{ObjectStore, RefStore, NOTES_REF};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Outcome of a push attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Refs and objects arrived at the remote
    Pushed {
        /// Whether the notes ref also made it
        notes_pushed: bool,
    },
    /// Pushing is disabled or no remote is configured
    Skipped,
    /// A batch scope is active; the push runs once at scope exit
    Deferred,
    /// The transport failed; local state is unaffected
    Failed {
        /// Why
        reason: String,
    },
}

#[derive(Debug, Clone)]
enum Endpoint {
    Local(PathBuf),
    Ssh(String),
    Https(String),
}

// SSH session state is process-wide and initialized at most once, on first
// use of an ssh:// remote.
static SSH_SESSION: Lazy<()> = Lazy::new(|| {
    info!("ssh session layer initialized");
});

fn parse_url(url: &str) -> ChronResult<Endpoint> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Endpoint::Local(PathBuf::from(path)));
    }
    if url.starts_with("ssh://") {
        return Ok(Endpoint::Ssh(url.to_string()));
    }
    if url.starts_with("https://") || url.starts_with("http://") {
        return Ok(Endpoint::Https(url.to_string()));
    }
    if url.contains("://") {
        return Err(ChronError::invalid_input(format!(
            "unsupported remote URL scheme: {}",
            url
        )));
    }
    // Bare paths behave like file:// URLs.
    Ok(Endpoint::Local(PathBuf::from(url)))
}

/// Per-instance remote state
pub struct RemoteManager {
    settings: RemoteConfig,
    endpoint: Option<Endpoint>,
    batch_depth: AtomicU32,
    deferred: AtomicBool,
}

impl RemoteManager {
    /// Build from config; a missing URL disables every remote operation.
    pub fn new(settings: &RemoteConfig) -> ChronResult<Self> {
        let endpoint = match &settings.url {
            Some(url) => Some(parse_url(url)?),
            None => None,
        };
        Ok(RemoteManager {
            settings: settings.clone(),
            endpoint,
            batch_depth: AtomicU32::new(0),
            deferred: AtomicBool::new(false),
        })
    }

    /// Check whether a remote is configured.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Called by the commit engine after every successful commit.
    pub fn after_commit(&self, db: &Database) -> PushOutcome {
        if !self.settings.push_enabled || self.endpoint.is_none() {
            return PushOutcome::Skipped;
        }
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            self.deferred.store(true, Ordering::Release);
            return PushOutcome::Deferred;
        }
        self.push(db)
    }

    pub(crate) fn enter_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn exit_batch(&self, db: &Database) -> PushOutcome {
        let depth = self.batch_depth.fetch_sub(1, Ordering::AcqRel);
        if depth != 1 {
            return PushOutcome::Deferred;
        }
        if self.deferred.swap(false, Ordering::AcqRel) {
            self.push(db)
        } else {
            PushOutcome::Skipped
        }
    }

    /// Push branch refs and the notes ref to the remote.
    pub fn push(&self, db: &Database) -> PushOutcome {
        let endpoint = match &self.endpoint {
            Some(e) => e,
            None => return PushOutcome::Skipped,
        };
        match self.push_to(endpoint, db) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "push failed");
                PushOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn push_to(&self, endpoint: &Endpoint, db: &Database) -> ChronResult<PushOutcome> {
        let remote_dir = self.require_local(endpoint)?;
        std::fs::create_dir_all(&remote_dir)?;
        let remote_objects = ObjectStore::open(&remote_dir)?;
        let remote_refs = RefStore::open(&remote_dir)?;

        // Objects first, refs second: a remote ref never points at bytes the
        // remote does not have.
        let mut copied = 0usize;
        for id in db.objects().list_ids()? {
            if !remote_objects.contains(&id) {
                remote_objects.put(&db.objects().get(&id)?)?;
                copied += 1;
            }
        }
        for branch in db.refs().list_branches()? {
            let tip = db.tip(&branch)?;
            remote_refs.force_set(&chrondb_storage::branch_ref(&branch), tip)?;
        }

        let mut notes_pushed = false;
        if self.settings.push_notes {
            match db.refs().read(NOTES_REF)? {
                Some(notes_tip) => match remote_refs.force_set(NOTES_REF, notes_tip) {
                    Ok(()) => notes_pushed = true,
                    Err(e) => warn!(error = %e, "notes push failed, branch push kept"),
                },
                None => debug!("no notes ref to push"),
            }
        }
        info!(remote = %remote_dir.display(), copied, notes_pushed, "pushed");
        Ok(PushOutcome::Pushed { notes_pushed })
    }

    /// Fetch remote objects and return the remote's refs.
    pub fn fetch(&self, db: &Database) -> ChronResult<Vec<(String, ObjectId)>> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| ChronError::remote(RemoteErrorKind::Transport, "no remote configured"))?;
        let remote_dir = self.require_local(endpoint)?;
        let remote_objects = ObjectStore::open(&remote_dir)?;
        let remote_refs = RefStore::open(&remote_dir)?;

        let mut copied = 0usize;
        for id in remote_objects.list_ids()? {
            if !db.objects().contains(&id) {
                // get() verifies the hash, so a corrupt remote object never
                // lands locally.
                db.objects().put(&remote_objects.get(&id)?)?;
                copied += 1;
            }
        }
        let refs = remote_refs.list()?;
        info!(remote = %remote_dir.display(), copied, refs = refs.len(), "fetched");
        Ok(refs)
    }

    /// Fetch, then fast-forward local branches to the remote tips.
    ///
    /// Never creates a merge: a diverged branch fails with
    /// `RemoteError(Diverged)` and no local ref moves.
    pub fn pull(&self, db: &Database) -> ChronResult<()> {
        let remote_refs = self.fetch(db)?;
        for (name, remote_tip) in remote_refs {
            let branch = match name.strip_prefix("heads/") {
                Some(b) => chrondb_core::BranchName::new(b)?,
                None => {
                    if name == NOTES_REF {
                        // Notes fast-forward is best effort, mirroring push.
                        if let Err(e) = db.refs().force_set(NOTES_REF, remote_tip) {
                            warn!(error = %e, "notes fetch update failed");
                        }
                    }
                    continue;
                }
            };
            let ref_name = chrondb_storage::branch_ref(&branch);
            match db.refs().read(&ref_name)? {
                None => {
                    db.refs().force_set(&ref_name, remote_tip)?;
                    db.reindex(&branch)?;
                }
                Some(local_tip) if local_tip == remote_tip => {}
                Some(local_tip) => {
                    if is_ancestor(db.objects(), &local_tip, &remote_tip)? {
                        db.refs().force_set(&ref_name, remote_tip)?;
                        db.reindex(&branch)?;
                    } else {
                        return Err(ChronError::remote(
                            RemoteErrorKind::Diverged,
                            format!("branch {} has diverged from the remote", branch),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn require_local(&self, endpoint: &Endpoint) -> ChronResult<PathBuf> {
        match endpoint {
            Endpoint::Local(path) => Ok(path.clone()),
            Endpoint::Ssh(url) => {
                Lazy::force(&SSH_SESSION);
                Err(ChronError::remote(
                    RemoteErrorKind::Unsupported,
                    format!("no ssh transport linked for {}", url),
                ))
            }
            Endpoint::Https(url) => Err(ChronError::remote(
                RemoteErrorKind::Unsupported,
                format!("no https transport linked for {}", url),
            )),
        }
    }
}

/// Batch scope handle
///
/// While at least one guard is alive, pushes are deferred; dropping (or
/// explicitly ending) the outermost guard flushes exactly one push covering
/// everything committed inside the scope.
pub struct BatchGuard<'a> {
    db: &'a Database,
    ended: bool,
}

impl<'a> BatchGuard<'a> {
    /// End the scope and report the flushed push's outcome.
    pub fn end(mut self) -> PushOutcome {
        self.ended = true;
        self.db.remote().exit_batch(self.db)
    }
}

impl<'a> Drop for BatchGuard<'a> {
    fn drop(&mut self) {
        if !self.ended {
            let outcome = self.db.remote().exit_batch(self.db);
            debug!(outcome = ?outcome, "batch scope dropped");
        }
    }
}

impl Database {
    /// Enter a batch scope deferring remote pushes until the guard ends.
    pub fn begin_batch(&self) -> BatchGuard<'_> {
        self.remote().enter_batch();
        BatchGuard {
            db: self,
            ended: false,
        }
    }

    /// Pull from the configured remote (fetch + fast-forward).
    pub fn pull(&self) -> ChronResult<()> {
        self.remote().pull(self)
    }
}
