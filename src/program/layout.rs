//! On-disk layout of recordings.
//!
//! ```text
//! {root}/{programId}-{slug(title)}/{YYYYMMDD}/recording-manifest.json
//! {root}/{programId}-{slug(title)}/{YYYYMMDD}/{programId}-{slug}_chunk_20230716_140000.mp3
//! ```

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{ProgramDescriptor, ProgramId};
use crate::clock::LocalDay;

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

/// A recording directory found by scanning the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecording {
    pub program_dir: String,
    pub day: LocalDay,
    pub dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{programId}-{slug(title)}`, also used as the chunk file prefix.
    pub fn base_name(program: &ProgramDescriptor) -> String {
        format!("{}-{}", program.id, slugify(&program.title))
    }

    pub fn program_dir(&self, program: &ProgramDescriptor) -> PathBuf {
        self.root.join(Self::base_name(program))
    }

    pub fn recording_dir(&self, program: &ProgramDescriptor, day: LocalDay) -> PathBuf {
        self.program_dir(program).join(day.to_string())
    }

    /// Output pattern handed to the encoder; strftime fields are expanded per segment.
    pub fn chunk_pattern(&self, program: &ProgramDescriptor, dir: &Path, extension: &str) -> PathBuf {
        dir.join(format!(
            "{}_chunk_%Y%m%d_%H%M%S.{}",
            Self::base_name(program),
            extension
        ))
    }

    /// Locates the directory of a program day without the descriptor, from the
    /// directory naming alone. Used after a restart when the live tables are empty.
    pub fn find_recording_dir(&self, program_id: &ProgramId, day: LocalDay) -> Option<PathBuf> {
        let prefix = format!("{}-", program_id);
        let entries = std::fs::read_dir(&self.root).ok()?;

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                // Slugs never contain '-', so the remainder must be dash free.
                name.strip_prefix(&prefix)
                    .is_some_and(|slug| !slug.is_empty() && !slug.contains('-'))
            })
            .map(|entry| entry.path().join(day.to_string()))
            .find(|dir| dir.is_dir())
    }

    /// Every `{program}/{day}` directory under the root, sorted.
    pub fn discover(&self) -> Vec<StoredRecording> {
        let mut found: Vec<StoredRecording> = WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| {
                let day: LocalDay = entry.file_name().to_str()?.parse().ok()?;
                let program_dir = entry
                    .path()
                    .parent()?
                    .file_name()?
                    .to_string_lossy()
                    .into_owned();
                Some(StoredRecording {
                    program_dir,
                    day,
                    dir: entry.into_path(),
                })
            })
            .collect();

        found.sort_by(|a, b| (&a.program_dir, a.day).cmp(&(&b.program_dir, b.day)));
        found
    }
}

/// Lowercases, maps anything outside `[a-z0-9]` to `_` and collapses repeats.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if c == '_' && slug.ends_with('_') {
            continue;
        }
        slug.push(c);
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::sample_program;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("France Inter"), "france_inter");
        assert_eq!(slugify("Le 7/9 -- Matin!"), "le_7_9_matin_");
        assert_eq!(slugify("Ça va"), "_a_va");
    }

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/data/rec");
        let program = sample_program("p1", 0, 60);
        let day: LocalDay = "20230716".parse().unwrap();

        let dir = layout.recording_dir(&program, day);
        assert_eq!(dir, PathBuf::from("/data/rec/p1-france_inter/20230716"));
        assert_eq!(
            layout.chunk_pattern(&program, &dir, "mp3"),
            PathBuf::from("/data/rec/p1-france_inter/20230716/p1-france_inter_chunk_%Y%m%d_%H%M%S.mp3")
        );
    }

    #[test]
    fn test_find_recording_dir_disambiguates_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let day: LocalDay = "20230716".parse().unwrap();

        std::fs::create_dir_all(tmp.path().join("abc-def-news").join("20230716")).unwrap();
        assert!(layout.find_recording_dir(&ProgramId::new("abc"), day).is_none());

        std::fs::create_dir_all(tmp.path().join("abc-news").join("20230716")).unwrap();
        assert_eq!(
            layout.find_recording_dir(&ProgramId::new("abc"), day),
            Some(tmp.path().join("abc-news").join("20230716"))
        );
        assert_eq!(
            layout.find_recording_dir(&ProgramId::new("abc-def"), day),
            Some(tmp.path().join("abc-def-news").join("20230716"))
        );
        assert!(layout
            .find_recording_dir(&ProgramId::new("abc"), day.next())
            .is_none());
    }

    #[test]
    fn test_discover_skips_non_day_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("b-show").join("20230717")).unwrap();
        std::fs::create_dir_all(tmp.path().join("a-show").join("20230716")).unwrap();
        std::fs::create_dir_all(tmp.path().join("a-show").join("scratch")).unwrap();

        let found = layout.discover();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].program_dir, "a-show");
        assert_eq!(found[1].day.to_string(), "20230717");
    }
}
