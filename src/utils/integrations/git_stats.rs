//! Version-control history collaborators.
//!
//! Two sources feed the history miner: a git repository opened through git2,
//! and a pre-generated `git log --numstat` text file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use git2::{ObjectType, Patch, Repository, Sort, TreeWalkMode, TreeWalkResult};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

lazy_static! {
    // --pretty=format:--COMMIT--%ad--%aN with --date=short
    static ref COMMIT_HEADER: Regex = Regex::new(r"^--COMMIT--(\d{4}-\d{2}-\d{2})--(.*)$").unwrap();
    // added<TAB>removed<TAB>path, binary files report "-"
    static ref NUMSTAT_LINE: Regex = Regex::new(r"^(\d+|-)\s+(\d+|-)\s+(\S.*)$").unwrap();
}

/// Lines changed in one file by one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path relative to the history root, `/`-separated
    pub path: String,
    pub added: usize,
    pub removed: usize,
}

impl FileChange {
    pub fn lines_changed(&self) -> usize {
        self.added + self.removed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub date: NaiveDate,
    pub author: String,
    pub changes: Vec<FileChange>,
}

/// Anything that can list commits with per-file line counts
pub trait HistorySource {
    /// Directory the change paths are relative to
    fn root(&self) -> &Path;

    /// Non-merge commits dated on or after `since`, newest first
    fn commits(&self, since: NaiveDate) -> Result<Vec<CommitRecord>>;

    /// Paths currently under version control, or `None` when the source cannot tell
    fn tracked_files(&self) -> Result<Option<BTreeSet<String>>>;
}

/// History read straight from a git repository
pub struct GitRepository {
    repo: Repository,
    root: PathBuf,
}

impl GitRepository {
    /// Opens the repository containing `path`.
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .with_context(|| format!("{:?} is not inside a git repository", path))?;
        let workdir = repo
            .workdir()
            .context("Bare repositories have no working tree")?
            .to_path_buf();
        let root = workdir.canonicalize().unwrap_or(workdir);
        debug!("Using git repository at {:?}", root);
        Ok(Self { repo, root })
    }
}

impl HistorySource for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn commits(&self, since: NaiveDate) -> Result<Vec<CommitRecord>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head().context("Repository has no commits")?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            let date = DateTime::from_timestamp(commit.time().seconds(), 0)
                .map(|t| t.date_naive())
                .unwrap_or_default();
            if date < since {
                break;
            }
            // Like `git log --numstat`, merges contribute no line counts.
            if commit.parent_count() > 1 {
                continue;
            }

            let tree = commit.tree()?;
            let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
            let diff = self
                .repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

            let mut changes = Vec::new();
            for idx in 0..diff.deltas().len() {
                let Some(delta) = diff.get_delta(idx) else {
                    continue;
                };
                let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path())
                else {
                    continue;
                };
                let (added, removed) = match Patch::from_diff(&diff, idx)? {
                    Some(patch) => {
                        let (_, added, removed) = patch.line_stats()?;
                        (added, removed)
                    }
                    None => (0, 0),
                };
                changes.push(FileChange {
                    path: path.to_string_lossy().replace('\\', "/"),
                    added,
                    removed,
                });
            }

            commits.push(CommitRecord {
                date,
                author: commit.author().name().unwrap_or("Unknown").to_string(),
                changes,
            });
        }
        Ok(commits)
    }

    fn tracked_files(&self) -> Result<Option<BTreeSet<String>>> {
        let tree = self.repo.head()?.peel_to_tree()?;
        let mut files = BTreeSet::new();
        tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(ObjectType::Blob)
                && let Some(name) = entry.name()
            {
                files.insert(format!("{}{}", dir, name));
            }
            TreeWalkResult::Ok
        })?;
        Ok(Some(files))
    }
}

/// History parsed from `git log --numstat --date=short --pretty=format:--COMMIT--%ad--%aN`
#[derive(Debug, Clone)]
pub struct NumstatLog {
    root: PathBuf,
    commits: Vec<CommitRecord>,
}

impl NumstatLog {
    pub fn open(log: &Path, root: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(log)
            .with_context(|| format!("Failed to read git log {:?}", log))?;
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Ok(Self::parse(&text, root))
    }

    pub fn parse(text: &str, root: PathBuf) -> Self {
        let mut commits: Vec<CommitRecord> = Vec::new();
        let mut skipped = 0usize;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = COMMIT_HEADER.captures(line) {
                match NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
                    Ok(date) => commits.push(CommitRecord {
                        date,
                        author: caps[2].to_string(),
                        changes: Vec::new(),
                    }),
                    Err(err) => {
                        warn!("Bad commit date in git log line {:?}: {}", line, err);
                        skipped += 1;
                    }
                }
            } else if let Some(caps) = NUMSTAT_LINE.captures(line)
                && let Some(commit) = commits.last_mut()
            {
                let count = |m: &str| m.parse::<usize>().unwrap_or(0);
                commit.changes.push(FileChange {
                    path: caps[3].to_string(),
                    added: count(&caps[1]),
                    removed: count(&caps[2]),
                });
            } else {
                skipped += 1;
            }
        }

        if skipped > 0 {
            debug!("Ignored {} unrecognised git log lines", skipped);
        }
        Self { root, commits }
    }
}

impl HistorySource for NumstatLog {
    fn root(&self) -> &Path {
        &self.root
    }

    fn commits(&self, since: NaiveDate) -> Result<Vec<CommitRecord>> {
        Ok(self
            .commits
            .iter()
            .filter(|c| c.date >= since)
            .cloned()
            .collect())
    }

    fn tracked_files(&self) -> Result<Option<BTreeSet<String>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn commit_all(repo: &Repository, files: &[(&str, &str)], message: &str) -> anyhow::Result<()> {
        let root = repo.workdir().unwrap().to_path_buf();
        let signature = git2::Signature::now("Test User", "test@example.com")?;
        let mut index = repo.index()?;
        for (path, content) in files {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap())?;
            std::fs::write(&full, content)?;
            index.add_path(Path::new(path))?;
        }
        index.write()?;
        let oid = index.write_tree()?;
        let tree = repo.find_tree(oid)?;
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)?;
        Ok(())
    }

    #[test]
    fn test_git_repository_line_stats() -> anyhow::Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let repo = Repository::init(temp_dir.path())?;

        commit_all(&repo, &[("pkg/a.py", "x = 1\ny = 2\n")], "Initial commit")?;
        commit_all(
            &repo,
            &[("pkg/a.py", "x = 1\ny = 3\nz = 4\n"), ("pkg/b.py", "w = 0\n")],
            "Second commit",
        )?;

        let source = GitRepository::discover(&temp_dir.path().join("pkg"))?;
        let since = Utc::now().date_naive() - chrono::Duration::days(365);
        let commits = source.commits(since)?;

        assert_eq!(commits.len(), 2);
        // Newest first
        let latest = &commits[0];
        let a = latest.changes.iter().find(|c| c.path == "pkg/a.py").unwrap();
        assert_eq!((a.added, a.removed), (2, 1));
        let b = latest.changes.iter().find(|c| c.path == "pkg/b.py").unwrap();
        assert_eq!(b.lines_changed(), 1);
        assert_eq!(commits[1].changes[0].added, 2);

        let tracked = source.tracked_files()?.unwrap();
        assert!(tracked.contains("pkg/a.py"));
        assert!(tracked.contains("pkg/b.py"));
        Ok(())
    }

    #[test]
    fn test_discover_outside_repository_fails() -> anyhow::Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        // A temp dir may sit under a checkout on some machines; only assert when it doesn't.
        if Repository::discover(temp_dir.path()).is_err() {
            assert!(GitRepository::discover(temp_dir.path()).is_err());
        }
        Ok(())
    }

    #[test]
    fn test_parse_numstat_log() {
        let log = "--COMMIT--2024-03-02--Ada\n\
                   10\t2\tsrc/pkg/a.py\n\
                   -\t-\tsrc/pkg/logo.png\n\
                   \n\
                   --COMMIT--2023-01-15--Grace Hopper\n\
                   3\t0\tsrc/pkg/b.py\n";
        let parsed = NumstatLog::parse(log, PathBuf::from("/repo"));

        let all = parsed
            .commits(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap())
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].author, "Ada");
        assert_eq!(all[0].changes[0].lines_changed(), 12);
        assert_eq!(all[0].changes[1].lines_changed(), 0);
        assert_eq!(all[1].author, "Grace Hopper");

        let recent = parsed
            .commits(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(parsed.tracked_files().unwrap(), None);
    }
}
