//! Built-in handlers for the five analysis task types.
//!
//! Payloads describe a slide deck:
//!
//! ```json
//! { "slides": [ { "title": "Intro", "body": "...",
//!                 "images": [ { "src": "a.png", "bytes": 120000 } ],
//!                 "animations": [ { "target": "title", "effect": "fade", "duration_ms": 400 } ] } ] }
//! ```
//!
//! Any payload may carry `delay_ms` to simulate a slow job.

use std::time::Duration;

use serde_json::{Map, Value, json};

use taskgrid_core::{HandlerError, TaskType};
use taskgrid_engine::HandlerRegistry;

const MAX_TITLE_CHARS: usize = 80;
const MAX_BODY_WORDS: usize = 120;

/// Ratio applied by the simulated image compressor.
const COMPRESSION_RATIO: f64 = 0.6;

pub fn registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with_fn(TaskType::SlideValidation, validate_slides)
        .with_fn(TaskType::AutoCorrection, correct_slides)
        .with_fn(TaskType::ContentExtraction, extract_content)
        .with_fn(TaskType::ImageExtraction, extract_images)
        .with_fn(TaskType::AnimationExtraction, extract_animations)
}

fn slides(payload: &Value) -> Result<&Vec<Value>, HandlerError> {
    simulate_delay(payload);
    payload
        .get("slides")
        .and_then(Value::as_array)
        .ok_or_else(|| HandlerError::invalid_payload("expected a `slides` array"))
}

fn simulate_delay(payload: &Value) {
    if let Some(ms) = payload.get("delay_ms").and_then(Value::as_u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

fn text<'a>(slide: &'a Value, key: &str) -> &'a str {
    slide.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn list<'a>(slide: &'a Value, key: &str) -> &'a [Value] {
    slide
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn validate_slides(payload: &Value) -> Result<Value, HandlerError> {
    let mut issues = Vec::new();
    for (i, slide) in slides(payload)?.iter().enumerate() {
        let title = text(slide, "title");
        if title.trim().is_empty() {
            issues.push(json!({ "slide": i, "issue": "missing title" }));
        } else if title.chars().count() > MAX_TITLE_CHARS {
            issues.push(json!({ "slide": i, "issue": "title too long" }));
        }
        if text(slide, "body").split_whitespace().count() > MAX_BODY_WORDS {
            issues.push(json!({ "slide": i, "issue": "body too long" }));
        }
    }
    Ok(json!({ "valid": issues.is_empty(), "issues": issues }))
}

fn tidy(s: &str) -> String {
    let joined = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => joined,
    }
}

fn correct_slides(payload: &Value) -> Result<Value, HandlerError> {
    let mut fixes = 0;
    let mut corrected = Vec::new();
    for slide in slides(payload)? {
        let mut out = match slide {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for key in ["title", "body"] {
            let original = text(slide, key);
            let fixed = tidy(original);
            if fixed != original {
                fixes += 1;
            }
            out.insert(key.to_string(), Value::String(fixed));
        }
        corrected.push(Value::Object(out));
    }
    Ok(json!({ "fixes": fixes, "slides": corrected }))
}

fn extract_content(payload: &Value) -> Result<Value, HandlerError> {
    let slides = slides(payload)?;
    let titles: Vec<&str> = slides.iter().map(|s| text(s, "title")).collect();
    let words: usize = slides
        .iter()
        .map(|s| text(s, "body").split_whitespace().count())
        .sum();
    Ok(json!({ "slide_count": slides.len(), "titles": titles, "word_count": words }))
}

fn extract_images(payload: &Value) -> Result<Value, HandlerError> {
    let mut images = Vec::new();
    let mut original_total = 0u64;
    let mut compressed_total = 0u64;
    for (i, slide) in slides(payload)?.iter().enumerate() {
        for image in list(slide, "images") {
            let bytes = image.get("bytes").and_then(Value::as_u64).unwrap_or(0);
            let compressed = (bytes as f64 * COMPRESSION_RATIO) as u64;
            original_total += bytes;
            compressed_total += compressed;
            images.push(json!({
                "slide": i,
                "src": text(image, "src"),
                "bytes": bytes,
                "compressed_bytes": compressed,
            }));
        }
    }
    Ok(json!({
        "images": images,
        "original_bytes": original_total,
        "compressed_bytes": compressed_total,
    }))
}

fn extract_animations(payload: &Value) -> Result<Value, HandlerError> {
    let mut timeline = Vec::new();
    let mut total_ms = 0u64;
    for (i, slide) in slides(payload)?.iter().enumerate() {
        for anim in list(slide, "animations") {
            let duration = anim.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
            timeline.push(json!({
                "slide": i,
                "start_ms": total_ms,
                "target": text(anim, "target"),
                "effect": text(anim, "effect"),
                "duration_ms": duration,
            }));
            total_ms += duration;
        }
    }
    Ok(json!({ "timeline": timeline, "total_duration_ms": total_ms }))
}
