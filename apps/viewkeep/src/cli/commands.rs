//! # CLI Command Implementations
//!
//! Each command has a `collect_*`/`resolve_*` half that returns data and a
//! `cmd_*` half that prints it, as text or JSON.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use viewkeep_core::{
    CacheNamespace, ConfigSource, FileSystemSource, IdCache, ProcessingContext, RefreshWindow,
    RefreshWindows, SessionScope, SourceId, StateConfig, StateSettings, StateStore, StoreBackend,
    TemplateCache, TemplateCompiler, TemplateHandle, ViewId, ViewkeepError,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum size of a single template source (10 MB).
const MAX_TEMPLATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Parse a TOML configuration document.
pub fn parse_config(text: &str) -> Result<StateConfig, ViewkeepError> {
    toml::from_str(text)
        .map_err(|e| ViewkeepError::DeserializationError(format!("Invalid configuration: {e}")))
}

/// Load the configuration file, or defaults when none was given.
pub fn load_config(path: Option<&Path>) -> Result<StateConfig, ViewkeepError> {
    let Some(path) = path else {
        return Ok(StateConfig::default());
    };

    let metadata = std::fs::metadata(path).map_err(|e| {
        ViewkeepError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ViewkeepError::PayloadTooLarge {
            size: metadata.len() as usize,
            max: MAX_CONFIG_FILE_SIZE as usize,
        });
    }

    let text = std::fs::read_to_string(path).map_err(|e| {
        ViewkeepError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
    })?;
    let config = parse_config(&text)?;
    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Effective configuration, as the core resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigReport {
    pub mode: String,
    pub refresh_standard: String,
    pub refresh_view_metadata: String,
    pub refresh_composite_metadata: String,
    pub views_in_session: usize,
    pub client_state_signed: bool,
    pub component_id_cache_size: usize,
}

fn describe_window(window: RefreshWindow) -> String {
    match window {
        RefreshWindow::Infinite => "never".to_string(),
        RefreshWindow::Disabled => "disabled".to_string(),
        RefreshWindow::Every(millis) => format!("{}s", millis / 1000),
    }
}

/// Resolve `config` through the same readers the core uses.
pub fn resolve_config(config: &StateConfig) -> ConfigReport {
    let ctx = ProcessingContext::new(Arc::new(config.clone()), "viewkeep-cli");
    let windows = RefreshWindows::from_config(config);
    let settings = StateSettings::from_config(config);

    ConfigReport {
        mode: ctx.persistence_mode().to_string(),
        refresh_standard: describe_window(windows.standard),
        refresh_view_metadata: describe_window(windows.view_metadata),
        refresh_composite_metadata: describe_window(windows.composite_metadata),
        views_in_session: settings.views_in_session,
        client_state_signed: settings.mac_key.is_some(),
        component_id_cache_size: IdCache::from_config(config).len(),
    }
}

/// Show the effective configuration.
pub fn cmd_config(config: &StateConfig, json_mode: bool) -> Result<(), ViewkeepError> {
    let report = resolve_config(config);

    if json_mode {
        println!("{}", to_json(&report));
        return Ok(());
    }

    println!("viewkeep Configuration");
    println!("======================");
    println!("State saving:        {}", report.mode);
    println!("Views in session:    {}", report.views_in_session);
    println!("Client state signed: {}", report.client_state_signed);
    println!("Component id cache:  {}", report.component_id_cache_size);
    println!();
    println!("Refresh windows:");
    println!("  standard:           {}", report.refresh_standard);
    println!("  view-metadata:      {}", report.refresh_view_metadata);
    println!("  composite-metadata: {}", report.refresh_composite_metadata);

    Ok(())
}

// =============================================================================
// VIEWS COMMAND
// =============================================================================

/// One retained view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    pub session: String,
    pub view: String,
    pub sequence: u64,
    pub token: String,
}

/// List retained views, oldest first within each scope.
pub fn collect_views(
    store: &dyn StateStore,
    session: Option<&str>,
) -> Result<Vec<ViewEntry>, ViewkeepError> {
    let scopes = match session {
        Some(session) => vec![SessionScope::new(session)],
        None => store.scopes()?,
    };

    let mut entries = Vec::new();
    for scope in scopes {
        for token in store.tokens(&scope)? {
            entries.push(ViewEntry {
                session: scope.to_string(),
                view: token.view_id.to_string(),
                sequence: token.sequence,
                token: token.encode()?,
            });
        }
    }
    Ok(entries)
}

/// List retained views in the persistent store.
pub fn cmd_views(
    db_path: &Path,
    session: Option<&str>,
    json_mode: bool,
) -> Result<(), ViewkeepError> {
    let store = StoreBackend::with_redb(db_path)?;
    let entries = collect_views(&store, session)?;

    if json_mode {
        println!("{}", to_json(&entries));
        return Ok(());
    }

    println!("Retained Views");
    println!("==============");
    println!("Database: {}", db_path.display());
    println!();
    if entries.is_empty() {
        println!("(none)");
    }
    for entry in &entries {
        println!("{:<20} {:<32} #{:<6} {}", entry.session, entry.view, entry.sequence, entry.token);
    }

    Ok(())
}

// =============================================================================
// PURGE COMMAND
// =============================================================================

/// Invalidate a session scope, or one view in it. Returns the number removed.
pub fn purge(
    store: &dyn StateStore,
    session: &str,
    view: Option<&str>,
) -> Result<usize, ViewkeepError> {
    let scope = SessionScope::new(session);
    match view {
        Some(view) => store.invalidate_view(&scope, &ViewId::new(view)),
        None => store.invalidate_session(&scope),
    }
}

/// Invalidate retained views in the persistent store.
pub fn cmd_purge(
    db_path: &Path,
    session: &str,
    view: Option<&str>,
    json_mode: bool,
) -> Result<(), ViewkeepError> {
    let store = StoreBackend::with_redb(db_path)?;
    let removed = purge(&store, session, view)?;
    tracing::info!(session, view, removed, "purged view state");

    if json_mode {
        let output = serde_json::json!({
            "session": session,
            "view": view,
            "removed": removed,
        });
        println!("{}", to_json(&output));
        return Ok(());
    }

    match view {
        Some(view) => println!("Removed {removed} state(s) of {view} in session {session}"),
        None => println!("Removed {removed} state(s) in session {session}"),
    }
    Ok(())
}

// =============================================================================
// TEMPLATES COMMAND
// =============================================================================

/// What compiling a template source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSummary {
    pub bytes: usize,
    pub lines: usize,
}

/// Compiles template files into a [`TemplateSummary`].
#[derive(Debug, Clone)]
pub struct SummaryCompiler {
    files: FileSystemSource,
}

impl SummaryCompiler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            files: FileSystemSource::new(root),
        }
    }
}

impl TemplateCompiler for SummaryCompiler {
    type Artifact = TemplateSummary;

    fn compile(
        &self,
        _namespace: CacheNamespace,
        source: &SourceId,
    ) -> Result<TemplateSummary, ViewkeepError> {
        let path = self.files.path_of(source);
        let failed = |message: String| ViewkeepError::Construction {
            source_id: source.clone(),
            message,
        };

        let size = std::fs::metadata(&path)
            .map_err(|e| failed(e.to_string()))?
            .len();
        if size > MAX_TEMPLATE_FILE_SIZE {
            return Err(failed(format!(
                "{size} bytes exceeds maximum allowed {MAX_TEMPLATE_FILE_SIZE} bytes"
            )));
        }

        let text = std::fs::read_to_string(&path).map_err(|e| failed(e.to_string()))?;
        Ok(TemplateSummary {
            bytes: text.len(),
            lines: text.lines().count(),
        })
    }
}

/// Outcome of one cache lookup during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Compiled,
    Hit,
    Recompiled,
    Failed,
}

/// One line of the template walk report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateReport {
    pub pass: usize,
    pub source: String,
    pub status: TemplateStatus,
    pub bytes: usize,
    pub lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every file under `root` as a source id (`/`-separated, leading `/`), sorted.
pub fn list_sources(root: &Path) -> Result<Vec<SourceId>, ViewkeepError> {
    let mut found = BTreeSet::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            ViewkeepError::IoError(format!("Cannot read directory '{}': {}", dir.display(), e))
        })?;
        for entry in entries {
            let path = entry
                .map_err(|e| ViewkeepError::IoError(e.to_string()))?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                found.insert(format!("/{}", parts.join("/")));
            }
        }
    }

    Ok(found.into_iter().map(SourceId::new).collect())
}

/// Look every source under `dir` up `passes` times and report what the cache did.
pub fn walk_templates(
    config: &dyn ConfigSource,
    dir: &Path,
    refresh: Option<i64>,
    passes: usize,
) -> Result<Vec<TemplateReport>, ViewkeepError> {
    let windows = refresh
        .map(|secs| RefreshWindows::uniform(RefreshWindow::from_secs(secs)))
        .unwrap_or_else(|| RefreshWindows::from_config(config));
    let cache = TemplateCache::new(
        SummaryCompiler::new(dir),
        Arc::new(FileSystemSource::new(dir)),
        windows,
    );
    let sources = list_sources(dir)?;

    let mut previous: BTreeMap<SourceId, Arc<TemplateHandle<TemplateSummary>>> = BTreeMap::new();
    let mut reports = Vec::new();
    for pass in 1..=passes {
        for source in &sources {
            let report = match cache.get(CacheNamespace::Standard, source) {
                Ok(handle) => {
                    let status = match previous.get(source) {
                        None => TemplateStatus::Compiled,
                        Some(prior) if Arc::ptr_eq(prior, &handle) => TemplateStatus::Hit,
                        Some(_) => TemplateStatus::Recompiled,
                    };
                    let summary = handle.artifact();
                    let report = TemplateReport {
                        pass,
                        source: source.to_string(),
                        status,
                        bytes: summary.bytes,
                        lines: summary.lines,
                        error: None,
                    };
                    previous.insert(source.clone(), handle);
                    report
                }
                Err(e @ ViewkeepError::Construction { .. }) => TemplateReport {
                    pass,
                    source: source.to_string(),
                    status: TemplateStatus::Failed,
                    bytes: 0,
                    lines: 0,
                    error: Some(e.to_string()),
                },
                Err(e) => return Err(e),
            };
            reports.push(report);
        }
    }

    Ok(reports)
}

/// Walk a template directory through the template cache.
pub fn cmd_templates(
    config: &StateConfig,
    dir: &Path,
    refresh: Option<i64>,
    passes: usize,
    json_mode: bool,
) -> Result<(), ViewkeepError> {
    let reports = walk_templates(config, dir, refresh, passes)?;

    if json_mode {
        println!("{}", to_json(&reports));
        return Ok(());
    }

    println!("Template Cache Walk");
    println!("===================");
    println!("Directory: {}", dir.display());
    println!();
    for report in &reports {
        let status = match report.status {
            TemplateStatus::Compiled => "compiled",
            TemplateStatus::Hit => "hit",
            TemplateStatus::Recompiled => "recompiled",
            TemplateStatus::Failed => "FAILED",
        };
        match &report.error {
            Some(error) => println!("[{}] {:<11} {} ({})", report.pass, status, report.source, error),
            None => println!(
                "[{}] {:<11} {} ({} bytes, {} lines)",
                report.pass, status, report.source, report.bytes, report.lines
            ),
        }
    }

    Ok(())
}
