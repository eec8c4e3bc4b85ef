//! Build catalog client.
//!
//! `GET <url>api/builds?project=..&platforms[$like][0]=%<platform>%&$sort[id]=-1&$limit=N`
//! answers with the newest builds first, either as a bare JSON array or as a
//! paginated `{ "data": [..] }` page. The client keeps only completed builds
//! whose platform list names the configured tag and returns the highest id.

use std::time::Duration;

use serde::Deserialize;

use lazyploy_core::{BuildDescriptor, BuildId, Platform, ProjectName};

use crate::error::CatalogError;

const PAGE_LIMIT: usize = 25;
const COMPLETED_STATUSES: &[&str] = &["completed", "complete", "success", "succeeded", "ready"];

/// Answers "which build should this machine be running".
pub trait BuildCatalog: Send + Sync {
    fn latest_completed_build(
        &self,
        project: &ProjectName,
        platform: &Platform,
    ) -> Result<Option<BuildDescriptor>, CatalogError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BuildsPage {
    List(Vec<CatalogBuild>),
    Paged { data: Vec<CatalogBuild> },
}

impl BuildsPage {
    fn into_builds(self) -> Vec<CatalogBuild> {
        match self {
            BuildsPage::List(builds) | BuildsPage::Paged { data: builds } => builds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogBuild {
    id: i64,
    #[serde(default)]
    platforms: Option<PlatformList>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "artifactUrl")]
    artifact_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PlatformList {
    Many(Vec<String>),
    /// Comma separated, as older catalog records store it.
    One(String),
}

impl PlatformList {
    fn contains(&self, platform: &Platform) -> bool {
        let matches = |tag: &str| tag.trim().eq_ignore_ascii_case(&platform.0);
        match self {
            PlatformList::Many(tags) => tags.iter().any(|t| matches(t.as_str())),
            PlatformList::One(tags) => tags.split(',').any(matches),
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Records without a status predate status tracking and were only ever
/// listed once uploaded, so they count as completed.
fn is_completed(status: Option<&str>) -> bool {
    match status {
        None => true,
        Some(s) => COMPLETED_STATUSES
            .iter()
            .any(|done| s.trim().eq_ignore_ascii_case(done)),
    }
}

fn select_latest(
    builds: Vec<CatalogBuild>,
    base_url: &str,
    project: &ProjectName,
    platform: &Platform,
) -> Option<BuildDescriptor> {
    builds
        .into_iter()
        .filter(|b| b.platforms.as_ref().is_some_and(|p| p.contains(platform)))
        .filter(|b| is_completed(b.status.as_deref()))
        .max_by_key(|b| b.id)
        .map(|b| BuildDescriptor {
            id: BuildId(b.id),
            project: project.clone(),
            platform: platform.clone(),
            status: b.status.unwrap_or_else(|| "completed".to_string()),
            artifact_url: b.artifact_url.unwrap_or_else(|| {
                format!("{base_url}api/builds/{}/artifact?platform={platform}", b.id)
            }),
        })
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct HttpBuildCatalog {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpBuildCatalog {
    /// `base_url` must end in `/` (validated config guarantees it).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into(),
        }
    }
}

impl BuildCatalog for HttpBuildCatalog {
    fn latest_completed_build(
        &self,
        project: &ProjectName,
        platform: &Platform,
    ) -> Result<Option<BuildDescriptor>, CatalogError> {
        let url = format!("{}api/builds", self.base_url);
        let response = self
            .agent
            .get(&url)
            .query("project", &project.0)
            .query("platforms[$like][0]", &format!("%{platform}%"))
            .query("$sort[id]", "-1")
            .query("$limit", &PAGE_LIMIT.to_string())
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => {
                    CatalogError::Unavailable(format!("{url} answered HTTP {code}"))
                }
                other => CatalogError::Unavailable(format!("{url}: {other}")),
            })?;
        let page: BuildsPage = response
            .into_json()
            .map_err(|err| CatalogError::Unavailable(format!("undecodable build list: {err}")))?;

        let latest = select_latest(page.into_builds(), &self.base_url, project, platform);
        tracing::debug!(
            project = %project,
            platform = %platform,
            latest = ?latest.as_ref().map(|b| b.id),
            "catalog answered",
        );
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://catalog.local/";

    fn parse(json: &str) -> Vec<CatalogBuild> {
        serde_json::from_str::<BuildsPage>(json)
            .expect("page")
            .into_builds()
    }

    #[test]
    fn highest_completed_matching_build_wins() {
        let builds = parse(
            r#"[
                {"id": 9, "platforms": ["WindowsServer"], "status": "failed"},
                {"id": 8, "platforms": ["LinuxServer"], "status": "completed"},
                {"id": 7, "platforms": ["WindowsServer", "LinuxServer"], "status": "Completed"},
                {"id": 6, "platforms": ["WindowsServer"], "status": "completed"}
            ]"#,
        );
        let latest = select_latest(builds, BASE, &"Shooter".into(), &"WindowsServer".into())
            .expect("a build");
        assert_eq!(latest.id, BuildId(7));
        assert_eq!(
            latest.artifact_url,
            "http://catalog.local/api/builds/7/artifact?platform=WindowsServer"
        );
    }

    #[test]
    fn comma_separated_platforms_match_whole_tags_only() {
        let builds = parse(
            r#"{"total": 2, "data": [
                {"id": 4, "platforms": "LinuxServer", "artifact_url": "http://cdn/4.zip"},
                {"id": 3, "platforms": "Linux, WindowsNoEditor"}
            ]}"#,
        );
        let latest =
            select_latest(builds.clone(), BASE, &"Shooter".into(), &"Linux".into()).expect("linux");
        assert_eq!(latest.id, BuildId(3));

        let server =
            select_latest(builds, BASE, &"Shooter".into(), &"LinuxServer".into()).expect("server");
        assert_eq!(server.artifact_url, "http://cdn/4.zip");
    }

    #[test]
    fn nothing_completed_means_none() {
        let builds = parse(r#"[{"id": 2, "platforms": ["Linux"], "status": "building"}]"#);
        assert!(select_latest(builds, BASE, &"Shooter".into(), &"Linux".into()).is_none());
        assert!(select_latest(Vec::new(), BASE, &"Shooter".into(), &"Linux".into()).is_none());
    }

    #[test]
    fn unreachable_catalog_is_unavailable() {
        let catalog = HttpBuildCatalog::new("http://127.0.0.1:9/", Duration::from_millis(500));
        let err = catalog
            .latest_completed_build(&"Shooter".into(), &"Linux".into())
            .expect_err("nothing listens on the discard port");
        assert!(matches!(err, CatalogError::Unavailable(_)));
    }
}
