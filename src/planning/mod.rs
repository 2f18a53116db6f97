//! Sources of the capture planning.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::program::ProgramDescriptor;

/// Supplies the list of programs to capture.
#[async_trait]
pub trait PlanningLoader: Send + Sync {
    async fn load(&self) -> EngineResult<Vec<ProgramDescriptor>>;
}

#[derive(Debug, Deserialize)]
struct PlanningFile {
    #[serde(rename = "programsToCapture", default)]
    programs_to_capture: Vec<serde_json::Value>,
}

/// Reads `{"programsToCapture": [...]}` from a JSON file.
///
/// Entries that do not decode as a program are logged and left out; only an
/// unreadable or unparseable file fails the load.
#[derive(Debug, Clone)]
pub struct FilePlanningLoader {
    path: PathBuf,
}

impl FilePlanningLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configuration_error(&self, reason: impl ToString) -> EngineError {
        EngineError::Configuration {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PlanningLoader for FilePlanningLoader {
    async fn load(&self) -> EngineResult<Vec<ProgramDescriptor>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.configuration_error(e))?;
        let file: PlanningFile =
            serde_json::from_str(&content).map_err(|e| self.configuration_error(e))?;

        let mut programs = Vec::with_capacity(file.programs_to_capture.len());
        for (index, entry) in file.programs_to_capture.into_iter().enumerate() {
            match serde_json::from_value::<ProgramDescriptor>(entry) {
                Ok(program) => programs.push(program),
                Err(e) => warn!(
                    "Skipping planning entry #{} in {:?}: {}",
                    index, self.path, e
                ),
            }
        }

        info!("Loaded {} programs from {:?}", programs.len(), self.path);
        Ok(programs)
    }
}

/// Fixed in-memory planning.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanningLoader {
    programs: Vec<ProgramDescriptor>,
}

impl StaticPlanningLoader {
    pub fn new(programs: Vec<ProgramDescriptor>) -> Self {
        Self { programs }
    }
}

#[async_trait]
impl PlanningLoader for StaticPlanningLoader {
    async fn load(&self) -> EngineResult<Vec<ProgramDescriptor>> {
        Ok(self.programs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::sample_program;

    #[tokio::test]
    async fn test_file_loader_skips_bad_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("planning.json");
        std::fs::write(
            &path,
            r#"{
                "programsToCapture": [
                    {
                        "uuid": "7bf97a79-9612-411d-966b-657b6d77443e",
                        "title": "France Inter",
                        "streamURL": "http://direct.franceinter.fr/live/franceinter-midfi.mp3",
                        "startTimeUTCEpochSec": 1761605906,
                        "durationSeconds": 20,
                        "timeZone": "Europe/Paris",
                        "recorderSpecificParameters": {}
                    },
                    {"uuid": "broken", "title": "No stream"}
                ]
            }"#,
        )
        .unwrap();

        let programs = FilePlanningLoader::new(&path).load().await.unwrap();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].title, "France Inter");
        assert_eq!(programs[0].duration_seconds, 20);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = FilePlanningLoader::new(tmp.path().join("absent.json"));
        assert!(matches!(
            loader.load().await,
            Err(EngineError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_file_is_a_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("planning.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let err = FilePlanningLoader::new(&path).load().await.unwrap_err();
        assert!(err.to_string().contains("planning.json"));
    }

    #[tokio::test]
    async fn test_empty_planning_is_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("planning.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(FilePlanningLoader::new(&path).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_loader_returns_its_programs() {
        let program = sample_program("p1", 0, 10);
        let loader = StaticPlanningLoader::new(vec![program.clone()]);
        assert_eq!(loader.load().await.unwrap(), vec![program]);
    }
}
