use rmcp::{
    ServerHandler,
    tool,
    model::{ServerCapabilities, Implementation, ProtocolVersion, CallToolResult},
    handler::server::wrapper::Parameters,
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::DiscoveryError;
use crate::search::fusion::Viewer;
use crate::search::{SearchOrchestrator, SearchRequest};
use crate::store::postgres::PgDiscoveryStore;

pub struct DiscoveryService {
    orchestrator: Arc<SearchOrchestrator>,
    store: Arc<PgDiscoveryStore>,
    start_time: Instant,
}

impl DiscoveryService {
    pub fn new(orchestrator: Arc<SearchOrchestrator>, store: Arc<PgDiscoveryStore>) -> Self {
        Self {
            orchestrator,
            store,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DiscoverSearchParams {
    /// Natural language search query; empty string browses recent records
    pub query: Option<String>,
    /// Facet selections: facet code -> selected values, e.g. {"content_type": ["Photograph"]}
    pub filters: Option<HashMap<String, Vec<String>>>,
    /// Page number, 1-based (default: 1)
    pub page: Option<i64>,
    /// Results per page (1-100, default: 20)
    pub limit: Option<i64>,
    /// Scope to one institution (optional)
    pub institution_id: Option<i64>,
    /// Opaque session identifier for behavioral telemetry (optional)
    pub session_id: Option<String>,
    /// Client user agent, recorded with the search log (optional)
    pub user_agent: Option<String>,
    /// Access level: "anonymous", "authenticated", or "administrator" (default: "anonymous")
    pub viewer: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct AutocompleteParams {
    /// Query prefix, at least 2 characters (required)
    pub prefix: String,
    /// Scope to one institution (optional)
    pub institution_id: Option<i64>,
    /// Maximum suggestions to return (default: 10)
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct LogClickParams {
    /// The search_id returned by discover_search (required)
    pub search_id: i64,
    /// Catalog id of the clicked record (required)
    pub item_id: i64,
    /// 1-based position of the result in the list (required)
    pub position: i32,
    /// Milliseconds between the search response and the click (optional)
    pub time_to_click_ms: Option<i64>,
    /// Opaque session identifier (optional)
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct UpdateDwellTimeParams {
    /// The click_id returned by log_click (required)
    pub click_id: i64,
    /// Seconds the record page stayed open (required, non-negative)
    pub dwell_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchAnalyticsParams {
    /// Trailing window in days (default: 30)
    pub days: Option<i64>,
    /// Scope to one institution (optional)
    pub institution_id: Option<i64>,
}

// Helper: convert DiscoveryError to CallToolResult with isError: true
fn discovery_error_to_result(err: DiscoveryError) -> CallToolResult {
    match err {
        DiscoveryError::NotFound { what, id } => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("{} not found: {}", what, id),
            }))
        }
        DiscoveryError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        DiscoveryError::Storage(msg) => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("Storage error: {}", msg)
            }))
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string()
            }))
        }
    }
}

// Helper: parse the optional viewer string to an access level
fn parse_viewer(s: Option<&str>) -> Result<Viewer, CallToolResult> {
    match s {
        None => Ok(Viewer::Anonymous),
        Some("anonymous") => Ok(Viewer::Anonymous),
        Some("authenticated") => Ok(Viewer::Authenticated),
        Some("administrator") => Ok(Viewer::Administrator),
        Some(other) => Err(CallToolResult::structured_error(json!({
            "isError": true,
            "error": format!(
                "Invalid viewer '{}': expected anonymous, authenticated, or administrator",
                other
            ),
            "field": "viewer"
        }))),
    }
}

// Tool implementations
#[rmcp::tool_router]
impl DiscoveryService {
    #[tool(description = "Search the archival catalog with query understanding, multi-strategy retrieval, and behavioral ranking. Returns paginated result cards, facets, suggestions, and a search_id for click telemetry.")]
    async fn discover_search(
        &self,
        Parameters(params): Parameters<DiscoverSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "discover_search",
            query = ?params.query,
            page = ?params.page,
            "Tool called"
        );

        let viewer = match parse_viewer(params.viewer.as_deref()) {
            Ok(v) => v,
            Err(result) => return Ok(result),
        };

        let request = SearchRequest {
            query: params.query.unwrap_or_default(),
            filters: params.filters.unwrap_or_default(),
            page: params.page.unwrap_or(1),
            limit: params.limit.unwrap_or(20),
            institution_id: params.institution_id,
            session_id: params.session_id,
            user_agent: params.user_agent,
            viewer,
        };

        match self.orchestrator.search(request).await {
            Ok(response) => Ok(CallToolResult::structured(json!({
                "total": response.total,
                "page": response.page,
                "limit": response.limit,
                "pages": response.pages,
                "results": response.results,
                "facets": response.facets,
                "suggestions": response.suggestions,
                "query": response.query,
                "parsed_query": response.parsed_query,
                "filters_applied": response.filters_applied,
                "duration_ms": response.duration_ms,
                "search_id": response.search_id,
                "hint": "Pass search_id and a result position to log_click when the user opens a record"
            }))),
            Err(e) => Ok(discovery_error_to_result(e)),
        }
    }

    #[tool(description = "Autocomplete a query prefix from learned suggestions, padded with catalog titles. Prefix must be at least 2 characters.")]
    async fn autocomplete(
        &self,
        Parameters(params): Parameters<AutocompleteParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "autocomplete",
            prefix = %params.prefix,
            "Tool called"
        );

        let limit = params.limit.unwrap_or(10);

        match self
            .orchestrator
            .autocomplete(&params.prefix, params.institution_id, limit)
            .await
        {
            Ok(suggestions) => Ok(CallToolResult::structured(json!({
                "prefix": params.prefix,
                "suggestions": suggestions,
            }))),
            Err(e) => Ok(discovery_error_to_result(e)),
        }
    }

    #[tool(description = "Record a click on a search result. Returns a click_id to pass to update_dwell_time when the user leaves the record page.")]
    async fn log_click(
        &self,
        Parameters(params): Parameters<LogClickParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "log_click",
            search_id = params.search_id,
            item_id = params.item_id,
            position = params.position,
            "Tool called"
        );

        if params.position < 1 {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'position' must be at least 1",
                "field": "position"
            })));
        }

        match self
            .orchestrator
            .log_click(
                params.search_id,
                params.item_id,
                params.position,
                params.time_to_click_ms,
                params.session_id,
            )
            .await
        {
            Ok(click_id) => Ok(CallToolResult::structured(json!({
                "click_id": click_id,
                "hint": "Call update_dwell_time with this click_id once the visit duration is known"
            }))),
            Err(e) => Ok(discovery_error_to_result(e)),
        }
    }

    #[tool(description = "Record how many seconds a clicked record stayed open. Dwell time feeds the engagement signal of the ranking model.")]
    async fn update_dwell_time(
        &self,
        Parameters(params): Parameters<UpdateDwellTimeParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "update_dwell_time",
            click_id = params.click_id,
            dwell_seconds = params.dwell_seconds,
            "Tool called"
        );

        match self
            .orchestrator
            .update_dwell_time(params.click_id, params.dwell_seconds)
            .await
        {
            Ok(()) => Ok(CallToolResult::structured(json!({
                "click_id": params.click_id,
                "dwell_seconds": params.dwell_seconds,
            }))),
            Err(e) => Ok(discovery_error_to_result(e)),
        }
    }

    #[tool(description = "Search behavior analytics over a trailing window: volumes, zero-result rate, click-through rate, top queries, and per-day counts.")]
    async fn search_analytics(
        &self,
        Parameters(params): Parameters<SearchAnalyticsParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search_analytics",
            days = ?params.days,
            "Tool called"
        );

        let days = params.days.unwrap_or(30);
        if days < 1 {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'days' must be at least 1",
                "field": "days"
            })));
        }

        match self
            .orchestrator
            .learning()
            .analytics(params.institution_id, days)
            .await
        {
            Ok(summary) => Ok(CallToolResult::structured(
                serde_json::to_value(&summary).unwrap_or_else(|_| json!({})),
            )),
            Err(e) => Ok(discovery_error_to_result(e)),
        }
    }

    #[tool(description = "Check server health: database connectivity and uptime.")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let database = match self.store.ping().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!(error = %e, "Health check database ping failed");
                return Ok(CallToolResult::structured_error(json!({
                    "isError": true,
                    "status": "unhealthy",
                    "error": format!("Database ping failed: {}", e),
                })));
            }
        };

        Ok(CallToolResult::structured(json!({
            "status": "healthy",
            "database": database,
            "uptime_seconds": self.uptime_seconds(),
            "version": env!("CARGO_PKG_VERSION"),
        })))
    }
}

#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for DiscoveryService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "trove".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Discovery search server for archival catalogs with query understanding and behavioral ranking".to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Archival discovery search. Tools: discover_search, autocomplete, log_click, update_dwell_time, search_analytics, health_check. Pass the search_id from discover_search to log_click, and the click_id from log_click to update_dwell_time.".to_string(),
            ),
        }
    }
}
