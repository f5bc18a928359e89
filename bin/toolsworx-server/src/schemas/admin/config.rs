use serde::Serialize;
use utoipa::ToSchema;

use crate::config::Config;

/// Non-secret view of the running configuration. Tokens and upstream URLs
/// are reduced to whether they are set.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub version: String,
    pub max_upload_size_mb: usize,
    pub max_pending_jobs: usize,
    pub ffmpeg_concurrency: usize,
    pub libreoffice_concurrency: usize,
    pub image_concurrency: usize,
    pub tool_timeout_secs: u64,
    pub mock_tools: bool,
    pub cleanup_interval_secs: u64,
    pub job_max_age_secs: u64,
    pub upstream_timeout_secs: u64,
    /// Families forwarded to an upstream service.
    pub proxied: Vec<String>,
    pub admin_token_set: bool,
    pub docs_enabled: bool,
}

impl From<&Config> for ConfigSummary {
    fn from(config: &Config) -> Self {
        let upstreams = &config.upstreams;
        let proxied = [
            ("file", &upstreams.file),
            ("media", &upstreams.media),
            ("filter", &upstreams.filter),
        ]
        .into_iter()
        .filter(|(_, url)| url.is_some())
        .map(|(kind, _)| kind.to_owned())
        .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            max_upload_size_mb: config.max_upload_size_mb,
            max_pending_jobs: config.max_pending_jobs,
            ffmpeg_concurrency: config.ffmpeg_concurrency,
            libreoffice_concurrency: config.libreoffice_concurrency,
            image_concurrency: config.image_concurrency,
            tool_timeout_secs: config.tool_timeout_secs,
            mock_tools: config.mock_tools,
            cleanup_interval_secs: config.cleanup_interval_secs,
            job_max_age_secs: config.job_max_age_secs,
            upstream_timeout_secs: config.upstream_timeout_secs,
            proxied,
            admin_token_set: config.admin_token.is_some(),
            docs_enabled: config.enable_docs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_not_exposed() {
        let config = Config::from_lookup(|key| match key {
            "TOOLSWORX_ADMIN_TOKEN" => Some("hunter2".into()),
            "MEDIA_SERVICE_URL" => Some("http://media.internal:9000".into()),
            _ => None,
        });
        let summary = ConfigSummary::from(&config);
        assert!(summary.admin_token_set);
        assert_eq!(summary.proxied, vec!["media".to_owned()]);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("media.internal"));
    }
}
