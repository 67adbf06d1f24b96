use crate::parsed_plan::{ParsedPlan, TemporalWindow};

/// Render a parsed plan as human-readable multiline text.
pub fn explain_parsed(plan: &ParsedPlan) -> String {
    let mut out = String::new();

    let c = &plan.cohort;
    out.push_str(&format!(
        "Cohort file_id={} entity={}\n",
        c.file_id.as_deref().unwrap_or("-"),
        c.entity_identifier.as_deref().unwrap_or("-"),
    ));
    match &c.path {
        Some(p) => out.push_str(&format!("  path={}\n", p.display())),
        None => out.push_str("  path=<unresolved>\n"),
    }
    if let Some(rows) = &c.row_represents {
        out.push_str(&format!("  row_represents={rows}\n"));
    }
    out.push_str(&format!("  filters={}\n", c.filters.len()));
    for f in &c.filters {
        out.push_str(&format!("    {} {:?} {}\n", f.column, f.op, f.value.as_text()));
    }

    let s = &plan.signal;
    out.push_str(&format!(
        "Signals group_id={} entity_key={}\n",
        s.group_id.as_deref().unwrap_or("-"),
        s.entity_identifier_key.as_deref().unwrap_or("-"),
    ));
    out.push_str(&format!("  files={}\n", s.files.len()));
    out.push_str(&format!("  params={:?}\n", s.param_keys));
    match &s.temporal {
        TemporalWindow::NoRestriction => out.push_str("  window=full_record\n"),
        TemporalWindow::Bounded {
            kind,
            start_column,
            end_column,
            margin_seconds,
        } => out.push_str(&format!(
            "  window={kind:?} [{start_column} - {margin_seconds}s, {end_column} + {margin_seconds}s]\n"
        )),
    }

    let j = &plan.join;
    out.push_str(&format!(
        "Join type={:?} on {} = {}\n",
        j.kind, j.cohort_key, j.signal_key
    ));
    out
}
