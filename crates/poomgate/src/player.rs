//! Player payload assembly.
//!
//! Chapters are sorted by start, clipped to the master duration, and made
//! non-overlapping by pulling each start up to the previous end. A segment
//! with a non-finite or inverted range rejects the whole manifest.

use poomproto::{
    Chapter, Manifest, ManifestSegment, OpenRunPlayerParams, PlayerPayload, PlayerSegment,
    RunReference, ToolError,
};

/// Run id named by the caller, if any. An explicit id wins over a reference;
/// a reference that does not parse is an argument error.
pub fn requested_run_id(
    params: &OpenRunPlayerParams,
    refs: &RunReference,
) -> Result<Option<String>, ToolError> {
    if let Some(run_id) = non_blank(params.run_id.as_deref()) {
        return Ok(Some(run_id.to_string()));
    }

    match non_blank(params.reference.as_deref()) {
        Some(reference) => refs.parse(reference).map(Some).ok_or_else(|| {
            ToolError::invalid_argument(format!(
                "reference {:?} is not a {}://run/<run_id> URL",
                reference,
                refs.scheme()
            ))
        }),
        None => Ok(None),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Build widget props from a manifest. Never returns a partial payload.
pub fn build_payload(
    run_id: &str,
    manifest: &Manifest,
    refs: &RunReference,
) -> Result<PlayerPayload, ToolError> {
    let master_url = manifest.master.playable_url().ok_or_else(|| {
        ToolError::manifest_invalid(format!("run {} has no playable master media", run_id))
    })?;

    for segment in &manifest.segments {
        validate_range(run_id, segment)?;
    }

    let duration_sec = match manifest.master.duration_sec {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => manifest
            .segments
            .iter()
            .map(|s| s.end_s)
            .fold(0.0, f64::max),
    };

    let mut ordered: Vec<&ManifestSegment> = manifest.segments.iter().collect();
    ordered.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));

    let mut chapters = Vec::with_capacity(ordered.len());
    let mut segments = Vec::with_capacity(ordered.len());
    let mut cursor = 0.0_f64;

    for (position, segment) in ordered.into_iter().enumerate() {
        let start = segment.start_s.max(cursor);
        let end = segment.end_s.min(duration_sec);
        if start >= end {
            continue;
        }
        cursor = end;

        let name = segment
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("Segment {}", position + 1));

        chapters.push(Chapter {
            segment_id: segment.segment_id.clone(),
            name: name.clone(),
            start_s: start,
            end_s: end,
        });
        segments.push(PlayerSegment {
            segment_id: segment.segment_id.clone(),
            title: name,
            start_s: start,
            end_s: end,
            duration_s: end - start,
            quiz_available: segment.quiz_available,
            clip_url: segment.clip_url.clone(),
        });
    }

    let title = manifest
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or_else(|| run_id.to_string());

    Ok(PlayerPayload {
        run_id: run_id.to_string(),
        title,
        reference_url: refs.url(run_id),
        master_url: master_url.to_string(),
        duration_sec,
        chapters,
        segments,
    })
}

fn validate_range(run_id: &str, segment: &ManifestSegment) -> Result<(), ToolError> {
    let (start, end) = (segment.start_s, segment.end_s);
    if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
        return Err(ToolError::manifest_invalid(format!(
            "run {} segment {} has invalid range [{}, {})",
            run_id, segment.segment_id, start, end
        )));
    }
    Ok(())
}
