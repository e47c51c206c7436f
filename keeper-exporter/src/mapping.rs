//! Mapping from database tables and columns to Prometheus names and values.

/// Table name prefixes dropped when composing metric names.
const STRIPPED_TABLE_PREFIXES: &[&str] = &["taosd_", "taos_"];

/// Historical metric names, keyed by `{raw_table}_{column}`.
///
/// Dashboards built against earlier releases query these names, so they win
/// over the generic composition rule.
const RENAMES: &[(&str, &str)] = &[
    ("taosd_cluster_basic_first_ep", "cluster_info_first_ep"),
    ("taosd_cluster_basic_first_ep_dnode_id", "cluster_info_first_ep_dnode_id"),
    ("taosd_cluster_basic_cluster_version", "cluster_info_version"),
    ("taosd_cluster_info_cluster_uptime", "cluster_info_master_uptime"),
    ("taosd_cluster_info_dbs_total", "cluster_info_dbs_total"),
    ("taosd_cluster_info_tbs_total", "cluster_info_tbs_total"),
    ("taosd_cluster_info_stbs_total", "cluster_info_stbs_total"),
    ("taosd_cluster_info_dnodes_total", "cluster_info_dnodes_total"),
    ("taosd_cluster_info_dnodes_alive", "cluster_info_dnodes_alive"),
    ("taosd_cluster_info_mnodes_total", "cluster_info_mnodes_total"),
    ("taosd_cluster_info_mnodes_alive", "cluster_info_mnodes_alive"),
    ("taosd_cluster_info_vgroups_total", "cluster_info_vgroups_total"),
    ("taosd_cluster_info_vgroups_alive", "cluster_info_vgroups_alive"),
    ("taosd_cluster_info_vnodes_total", "cluster_info_vnodes_total"),
    ("taosd_cluster_info_vnodes_alive", "cluster_info_vnodes_alive"),
    ("taosd_cluster_info_connections_total", "cluster_info_connections_total"),
    ("taosd_cluster_info_topics_total", "cluster_info_topics_total"),
    ("taosd_cluster_info_streams_total", "cluster_info_streams_total"),
    ("taosd_cluster_info_grants_expire_time", "grants_info_expire_time"),
    ("taosd_cluster_info_grants_timeseries_used", "grants_info_timeseries_used"),
    ("taosd_cluster_info_grants_timeseries_total", "grants_info_timeseries_total"),
    ("taosd_vgroups_info_vgroup_id", "vgroups_info_vgroup_id"),
    ("taosd_vgroups_info_database_name", "vgroups_info_database_name"),
    ("taosd_vgroups_info_tables_num", "vgroups_info_tables_num"),
    ("taosd_vgroups_info_status", "vgroups_info_status"),
    ("taosd_dnodes_info_uptime", "dnodes_info_uptime"),
    ("taosd_dnodes_info_cpu_engine", "dnodes_info_cpu_engine"),
    ("taosd_dnodes_info_cpu_system", "dnodes_info_cpu_system"),
    ("taosd_dnodes_info_cpu_cores", "dnodes_info_cpu_cores"),
    ("taosd_dnodes_info_mem_engine", "dnodes_info_mem_engine"),
    ("taosd_dnodes_info_mem_free", "dnodes_info_mem_system"),
    ("taosd_dnodes_info_mem_total", "dnodes_info_mem_total"),
    ("taosd_dnodes_info_disk_engine", "dnodes_info_disk_engine"),
    ("taosd_dnodes_info_disk_used", "dnodes_info_disk_used"),
    ("taosd_dnodes_info_disk_total", "dnodes_info_disk_total"),
    ("taosd_dnodes_info_system_net_in", "dnodes_info_net_in"),
    ("taosd_dnodes_info_system_net_out", "dnodes_info_net_out"),
    ("taosd_dnodes_info_io_read", "dnodes_info_io_read"),
    ("taosd_dnodes_info_io_write", "dnodes_info_io_write"),
    ("taosd_dnodes_info_io_read_disk", "dnodes_info_io_read_disk"),
    ("taosd_dnodes_info_io_write_disk", "dnodes_info_io_write_disk"),
    ("taosd_dnodes_info_vnodes_num", "dnodes_info_vnodes_num"),
    ("taosd_dnodes_info_masters", "dnodes_info_masters"),
    ("taosd_dnodes_info_has_mnode", "dnodes_info_has_mnode"),
    ("taosd_dnodes_info_has_qnode", "dnodes_info_has_qnode"),
    ("taosd_dnodes_info_has_snode", "dnodes_info_has_snode"),
    ("taosd_dnodes_info_has_bnode", "dnodes_info_has_bnode"),
    ("taosd_dnodes_info_errors", "dnodes_info_errors"),
    ("taosd_dnodes_info_error_log_count", "dnodes_info_error"),
    ("taosd_dnodes_info_info_log_count", "dnodes_info_info"),
    ("taosd_dnodes_info_debug_log_count", "dnodes_info_debug"),
    ("taosd_dnodes_info_trace_log_count", "dnodes_info_trace"),
    ("taosd_dnodes_status_status", "d_info_status"),
    ("taosd_mnodes_info_role", "m_info_role"),
    ("taosd_vnodes_info_role", "vnodes_role_vnode_role"),
];

/// Column name suffix marking a replica-role code.
pub const ROLE_SUFFIX: &str = "role";

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// This function:
/// - Replaces invalid characters with underscores
/// - Ensures the name starts with a letter or underscore
/// - Collapses multiple underscores into one
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    // A leading digit gets an underscore in front of it
    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            // Invalid characters and underscore runs both become one '_'
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Table name as it appears inside metric names.
pub fn logical_table_name(table: &str) -> &str {
    STRIPPED_TABLE_PREFIXES
        .iter()
        .find_map(|prefix| table.strip_prefix(prefix))
        .unwrap_or(table)
}

/// Historical name for a table column, if it has one.
pub fn renamed(table: &str, column: &str) -> Option<&'static str> {
    let key = format!("{}_{}", table, column);
    RENAMES
        .iter()
        .find(|(from, _)| *from == key)
        .map(|(_, to)| *to)
}

/// Build the fully-qualified metric name of a table column.
///
/// Format: `{prefix}_{logical_table}_{column}`, unless the column has a
/// historical name, which replaces everything after the prefix.
pub fn build_metric_name(prefix: &str, table: &str, column: &str) -> String {
    let body = match renamed(table, column) {
        Some(name) => name.to_string(),
        None => sanitize_metric_name(&format!("{}_{}", logical_table_name(table), column)),
    };
    with_prefix(prefix, body)
}

/// Metric name built from the raw table name, with no prefix stripping and
/// no historical rename. Used when the regular name is already taken.
pub fn raw_metric_name(prefix: &str, table: &str, column: &str) -> String {
    with_prefix(prefix, sanitize_metric_name(&format!("{}_{}", table, column)))
}

fn with_prefix(prefix: &str, body: String) -> String {
    if prefix.is_empty() {
        body
    } else {
        format!("{}_{}", prefix, body)
    }
}

/// Whether a column holds replica-role codes.
pub fn is_role_column(column: &str) -> bool {
    column.ends_with(ROLE_SUFFIX)
}

/// Human-readable name of a replica-role code.
///
/// Codes are rounded first; unmapped codes read as `unknown`.
pub fn role_label(code: f64) -> &'static str {
    match code.round() as i64 {
        0 => "offline",
        100 => "follower",
        101 => "candidate",
        102 => "leader",
        103 => "error",
        104 => "learner",
        _ => "unknown",
    }
}
