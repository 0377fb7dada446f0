//! Exercise corpus model.
//!
//! A corpus is a directory with one subdirectory per exercise. Each exercise
//! holds editable source stubs, hidden test files (`*_test.py`), and a hidden
//! `.docs/` directory with `instructions.md` and an optional
//! `introduction.md`.

pub mod layout;

use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::CorpusError;

pub use layout::{
    clean_corpus, commit_identifier, materialize, resolve_corpus_dir, CleanOutcome,
};

/// Suffix identifying hidden test files.
pub const TEST_SUFFIX: &str = "_test.py";

/// Hidden documentation directory inside each exercise.
pub const DOCS_DIR: &str = ".docs";

/// Required instructions file under [`DOCS_DIR`].
pub const INSTRUCTIONS_FILE: &str = "instructions.md";

/// Optional introduction file under [`DOCS_DIR`].
pub const INTRODUCTION_FILE: &str = "introduction.md";

/// One corpus entry, loaded from its directory.
#[derive(Debug, Clone)]
pub struct Exercise {
    /// Directory name, used as the exercise identifier.
    pub name: String,
    /// Path of the exercise directory.
    pub dir: PathBuf,
    /// Editable source files, sorted by name.
    pub editable_files: Vec<String>,
    /// Hidden test files, sorted by name (the fail-fast order).
    pub test_files: Vec<String>,
    /// Introduction (if any) followed by the instructions text.
    pub instructions: String,
}

impl Exercise {
    /// Loads an exercise from its directory.
    ///
    /// Fails if the directory has no hidden test files or no instructions.
    pub fn load(dir: &Path) -> Result<Self, CorpusError> {
        if !dir.is_dir() {
            return Err(CorpusError::NotADirectory(dir.to_path_buf()));
        }
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut editable_files = Vec::new();
        let mut test_files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(TEST_SUFFIX) {
                test_files.push(file_name);
            } else if is_editable(&file_name) {
                editable_files.push(file_name);
            }
        }
        editable_files.sort();
        test_files.sort();

        if test_files.is_empty() {
            return Err(CorpusError::MissingHiddenTests(name));
        }

        let instructions = read_instructions(dir, &name)?;
        debug!(
            exercise = %name,
            editable = editable_files.len(),
            tests = test_files.len(),
            "Loaded exercise"
        );

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            editable_files,
            test_files,
            instructions,
        })
    }

    /// Absolute-ish path of a file inside the exercise directory.
    pub fn path_of(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Paths of the editable files.
    pub fn editable_paths(&self) -> Vec<PathBuf> {
        self.editable_files.iter().map(|f| self.path_of(f)).collect()
    }

    /// Space-separated editable file names, as shown to the agent.
    pub fn file_list(&self) -> String {
        self.editable_files.join(" ")
    }

    /// Restores every editable file from the pristine corpus.
    ///
    /// Guards against resuming from a partially edited earlier attempt.
    pub fn reset_editable_files(&self, pristine_root: &Path) -> Result<(), CorpusError> {
        let pristine_dir = pristine_root.join(&self.name);
        for file in &self.editable_files {
            let original = pristine_dir.join(file);
            if !original.is_file() {
                return Err(CorpusError::PristineMissing(original));
            }
            fs::copy(&original, self.path_of(file))?;
        }
        Ok(())
    }
}

/// A file the agent may edit: no reserved `test` marker and not hidden.
fn is_editable(file_name: &str) -> bool {
    !file_name.contains("test") && !file_name.starts_with('.')
}

fn read_instructions(dir: &Path, name: &str) -> Result<String, CorpusError> {
    let docs = dir.join(DOCS_DIR);
    let mut text = String::new();

    let intro = docs.join(INTRODUCTION_FILE);
    if intro.is_file() {
        text.push_str(&fs::read_to_string(&intro)?);
        text.push_str("\n\n");
    }

    let instructions = docs.join(INSTRUCTIONS_FILE);
    if !instructions.is_file() {
        return Err(CorpusError::MissingInstructions {
            exercise: name.to_string(),
            path: instructions,
        });
    }
    text.push_str(&fs::read_to_string(&instructions)?);
    Ok(text)
}

/// Lists exercise directory names in a corpus, sorted.
pub fn list_exercises(corpus_dir: &Path) -> Result<Vec<String>, CorpusError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(corpus_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Picks the exercises for one run.
///
/// Keeps names containing `keyword`, shuffles them, then keeps at most
/// `limit` of them. A zero limit means no cap.
pub fn select<R: rand::Rng + ?Sized>(
    names: Vec<String>,
    keyword: Option<&str>,
    limit: Option<usize>,
    rng: &mut R,
) -> Vec<String> {
    let mut selected: Vec<String> = match keyword {
        Some(k) => names.into_iter().filter(|n| n.contains(k)).collect(),
        None => names,
    };
    selected.shuffle(rng);
    if let Some(limit) = limit.filter(|&n| n > 0) {
        selected.truncate(limit);
    }
    selected
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    /// Writes a minimal exercise: one stub, one hidden test, instructions.
    pub(crate) fn write_exercise(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join(DOCS_DIR)).unwrap();
        fs::write(dir.join(format!("{name}.py")), "def solve():\n    pass\n").unwrap();
        fs::write(
            dir.join(format!("{name}{TEST_SUFFIX}")),
            "def test_solve():\n    assert solve()\n",
        )
        .unwrap();
        fs::write(
            dir.join(DOCS_DIR).join(INSTRUCTIONS_FILE),
            format!("Implement {name}."),
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_load_classifies_files() {
        let temp = TempDir::new().unwrap();
        let dir = write_exercise(temp.path(), "bob");
        fs::write(dir.join(".bench.results.json"), "{}").unwrap();
        fs::write(dir.join("helpers_test_data.txt"), "x").unwrap();

        let exercise = Exercise::load(&dir).unwrap();
        assert_eq!(exercise.name, "bob");
        assert_eq!(exercise.editable_files, vec!["bob.py".to_string()]);
        assert_eq!(exercise.test_files, vec!["bob_test.py".to_string()]);
        assert_eq!(exercise.instructions, "Implement bob.");
        assert_eq!(exercise.file_list(), "bob.py");
    }

    #[test]
    fn test_load_prepends_introduction() {
        let temp = TempDir::new().unwrap();
        let dir = write_exercise(temp.path(), "clock");
        fs::write(dir.join(DOCS_DIR).join(INTRODUCTION_FILE), "Some history.").unwrap();

        let exercise = Exercise::load(&dir).unwrap();
        assert_eq!(exercise.instructions, "Some history.\n\nImplement clock.");
    }

    #[test]
    fn test_load_requires_hidden_tests() {
        let temp = TempDir::new().unwrap();
        let dir = write_exercise(temp.path(), "anagram");
        fs::remove_file(dir.join("anagram_test.py")).unwrap();

        let err = Exercise::load(&dir).unwrap_err();
        assert!(matches!(err, CorpusError::MissingHiddenTests(name) if name == "anagram"));
    }

    #[test]
    fn test_load_requires_instructions() {
        let temp = TempDir::new().unwrap();
        let dir = write_exercise(temp.path(), "grep");
        fs::remove_file(dir.join(DOCS_DIR).join(INSTRUCTIONS_FILE)).unwrap();

        assert!(matches!(
            Exercise::load(&dir),
            Err(CorpusError::MissingInstructions { .. })
        ));
    }

    #[test]
    fn test_reset_editable_files() {
        let pristine = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_exercise(pristine.path(), "leap");
        let dir = write_exercise(work.path(), "leap");
        fs::write(dir.join("leap.py"), "half edited").unwrap();

        let exercise = Exercise::load(&dir).unwrap();
        exercise.reset_editable_files(pristine.path()).unwrap();

        let restored = fs::read_to_string(dir.join("leap.py")).unwrap();
        assert_eq!(restored, "def solve():\n    pass\n");
    }

    #[test]
    fn test_reset_without_pristine_copy() {
        let pristine = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let dir = write_exercise(work.path(), "leap");

        let exercise = Exercise::load(&dir).unwrap();
        assert!(matches!(
            exercise.reset_editable_files(pristine.path()),
            Err(CorpusError::PristineMissing(_))
        ));
    }

    #[test]
    fn test_list_exercises_only_dirs() {
        let temp = TempDir::new().unwrap();
        write_exercise(temp.path(), "zipper");
        write_exercise(temp.path(), "acronym");
        fs::write(temp.path().join("README.md"), "corpus").unwrap();

        let names = list_exercises(temp.path()).unwrap();
        assert_eq!(names, vec!["acronym".to_string(), "zipper".to_string()]);
    }

    #[test]
    fn test_select_keyword_and_limit() {
        let names: Vec<String> = ["word-count", "wordy", "bob", "word-search"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut rng = StdRng::seed_from_u64(7);

        let selected = select(names.clone(), Some("word"), None, &mut rng);
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|n| n.contains("word")));

        let capped = select(names, None, Some(2), &mut rng);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_select_zero_limit_keeps_all() {
        let names: Vec<String> = ["bob", "wordy", "zipper"].iter().map(|s| s.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let mut selected = select(names.clone(), None, Some(0), &mut rng);
        selected.sort();
        assert_eq!(selected, names);
    }
}
