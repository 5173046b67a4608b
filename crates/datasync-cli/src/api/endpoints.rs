//! API endpoint URL builders

fn trim(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Build health check URL
pub fn health_url(base_url: &str) -> String {
    format!("{}/health", trim(base_url))
}

/// Build workflow collection URL (start, list)
pub fn workflows_url(base_url: &str) -> String {
    format!("{}/api/v1/workflows", trim(base_url))
}

/// Build workflow list URL with a row limit
pub fn workflow_list_url(base_url: &str, limit: usize) -> String {
    format!("{}?limit={}", workflows_url(base_url), limit)
}

/// Build workflow status URL
pub fn workflow_url(base_url: &str, workflow_id: &str) -> String {
    format!("{}/{}", workflows_url(base_url), workflow_id)
}

/// Build workflow signal URL (`pause`, `resume`, `cancel`)
pub fn workflow_signal_url(base_url: &str, workflow_id: &str, signal: &str) -> String {
    format!("{}/{}", workflow_url(base_url, workflow_id), signal)
}

/// Build catalog URL for a connection
pub fn catalog_url(base_url: &str, connection_id: &str) -> String {
    format!("{}/api/v1/connections/{}/catalog", trim(base_url), connection_id)
}

/// Build quality report URL for a connection
pub fn quality_report_url(base_url: &str, connection_id: &str) -> String {
    format!("{}/api/v1/connections/{}/quality-report", trim(base_url), connection_id)
}
