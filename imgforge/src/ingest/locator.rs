//! Locating the generated image inside an untyped provider response.
//!
//! Providers do not agree on a response shape: some return `{"image": "data:image/png;base64,..."}`,
//! some `{"images": [{"url": "..."}]}`, some bury a link several objects deep. [`PayloadLocator`]
//! runs an ordered list of [`ImageMatcher`]s over the response and returns the first hit:
//!
//! 1. [`DirectKeyMatcher`] - well-known top-level keys holding a single image value
//! 2. [`ArrayKeyMatcher`] - well-known top-level keys holding a list of candidates
//! 3. [`DeepScanMatcher`] - breadth-first walk over the whole tree
//!
//! The list runs twice. The first pass only admits references the materializer can store; the
//! second admits inline data of any image subtype, so an unsupported encoding is reported as such
//! instead of as a missing image.
//!
//! Supporting a new provider means adding a matcher, not editing the existing ones.

use super::ImageReference;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^data:image/([a-z0-9.+-]+);base64,(.*)$").expect("data URI pattern is valid")
});

static HTTP_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").expect("http pattern is valid"));

static IMAGE_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(png|jpe?g|webp|gif)(\?|#|$)").expect("extension pattern is valid"));

/// Parse an inline-data URI into its lower-cased MIME subtype and raw base64 payload.
pub(crate) fn parse_data_uri(candidate: &str) -> Option<(String, &str)> {
    let captures = DATA_URI.captures(candidate)?;
    let subtype = captures.get(1)?.as_str().to_ascii_lowercase();
    let payload = captures.get(2)?.as_str();
    Some((subtype, payload))
}

pub(crate) fn is_http_url(candidate: &str) -> bool {
    HTTP_URL.is_match(candidate)
}

fn has_image_extension(candidate: &str) -> bool {
    IMAGE_EXTENSION.is_match(candidate)
}

/// Which inline-data subtypes a locator pass admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Only subtypes the materializer can decode and store
    Supported,
    /// Any `data:image/<subtype>`
    AnySubtype,
}

impl Acceptance {
    pub fn admits(self, reference: &ImageReference) -> bool {
        self == Acceptance::AnySubtype || reference.is_supported()
    }
}

/// Accept inline data, or an http(s) URL that visibly points at an image file.
fn strict_candidate(value: &Value, acceptance: Acceptance) -> Option<ImageReference> {
    match relaxed_candidate(value, acceptance)? {
        ImageReference::RemoteUrl { url } if !has_image_extension(&url) => None,
        found => Some(found),
    }
}

/// Accept inline data, or any http(s) URL.
fn relaxed_candidate(value: &Value, acceptance: Acceptance) -> Option<ImageReference> {
    value
        .as_str()?
        .parse::<ImageReference>()
        .ok()
        .filter(|found| acceptance.admits(found))
}

/// One strategy for finding an image reference in a provider response.
pub trait ImageMatcher: Send + Sync {
    /// Short name used in logs when this matcher produces the result
    fn name(&self) -> &'static str;

    /// Return the first reference this strategy can see that `acceptance` admits, if any
    fn find(&self, response: &Value, acceptance: Acceptance) -> Option<ImageReference>;
}

/// Checks a priority list of top-level keys that usually hold a single image.
///
/// Only the first key with a truthy value is considered. If that value does not qualify, the
/// stage yields nothing and later keys are left to the other matchers. Remote URLs only qualify
/// here when they end in a known image extension, since keys like `url` or `result` are generic
/// enough to hold links to non-image resources.
pub struct DirectKeyMatcher {
    keys: Vec<&'static str>,
}

impl DirectKeyMatcher {
    pub fn new(keys: Vec<&'static str>) -> Self {
        Self { keys }
    }
}

impl Default for DirectKeyMatcher {
    fn default() -> Self {
        Self::new(vec!["image", "image_url", "imageUrl", "url", "result", "output"])
    }
}

impl ImageMatcher for DirectKeyMatcher {
    fn name(&self) -> &'static str {
        "direct_key"
    }

    fn find(&self, response: &Value, acceptance: Acceptance) -> Option<ImageReference> {
        let value = self.keys.iter().find_map(|key| response.get(*key).filter(|v| is_truthy(v)))?;
        strict_candidate(value, acceptance)
    }
}

/// Checks top-level arrays element by element, including `url`/`image`/`src` fields of object
/// elements.
pub struct ArrayKeyMatcher {
    keys: Vec<&'static str>,
    nested_keys: Vec<&'static str>,
}

impl ArrayKeyMatcher {
    pub fn new(keys: Vec<&'static str>, nested_keys: Vec<&'static str>) -> Self {
        Self { keys, nested_keys }
    }
}

impl Default for ArrayKeyMatcher {
    fn default() -> Self {
        Self::new(vec!["images", "output", "results"], vec!["url", "image", "src"])
    }
}

impl ImageMatcher for ArrayKeyMatcher {
    fn name(&self) -> &'static str {
        "array_key"
    }

    fn find(&self, response: &Value, acceptance: Acceptance) -> Option<ImageReference> {
        for key in &self.keys {
            let Some(items) = response.get(*key).and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                if let Some(found) = relaxed_candidate(item, acceptance) {
                    return Some(found);
                }
                if item.is_object() {
                    // Only the first present nested field is considered for each element
                    let nested = self.nested_keys.iter().find_map(|k| item.get(*k).filter(|v| is_truthy(v)));
                    if let Some(found) = nested.and_then(|v| relaxed_candidate(v, acceptance)) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }
}

/// Breadth-first scan over every object and array reachable from the root.
///
/// All scalar children of a container are inspected before any of its child containers are
/// queued, so a qualifying value closer to the root always wins over a deeper one.
#[derive(Default)]
pub struct DeepScanMatcher;

impl ImageMatcher for DeepScanMatcher {
    fn name(&self) -> &'static str {
        "deep_scan"
    }

    fn find(&self, response: &Value, acceptance: Acceptance) -> Option<ImageReference> {
        let mut queue: VecDeque<&Value> = VecDeque::from([response]);
        // Containers are tracked by address so the same node is never expanded twice
        let mut seen: HashSet<*const Value> = HashSet::new();

        while let Some(node) = queue.pop_front() {
            if !seen.insert(std::ptr::from_ref(node)) {
                continue;
            }
            let children: Box<dyn Iterator<Item = &Value>> = match node {
                Value::Object(map) => Box::new(map.values()),
                Value::Array(items) => Box::new(items.iter()),
                _ => continue,
            };
            for child in children {
                if let Some(found) = relaxed_candidate(child, acceptance) {
                    return Some(found);
                }
                if child.is_object() || child.is_array() {
                    queue.push_back(child);
                }
            }
            trace!(queued = queue.len(), "Deep scan expanded container");
        }
        None
    }
}

/// Mirrors the loose truthiness providers rely on: empty strings and nulls mean "absent".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Ordered collection of matchers; the first matcher to produce a reference wins.
pub struct PayloadLocator {
    matchers: Vec<Box<dyn ImageMatcher>>,
}

impl PayloadLocator {
    pub fn with_matchers(matchers: Vec<Box<dyn ImageMatcher>>) -> Self {
        Self { matchers }
    }

    /// Append a matcher that runs after all existing ones
    pub fn push(mut self, matcher: Box<dyn ImageMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Find the single best image reference in `response`. `None` is an expected outcome.
    pub fn locate(&self, response: &Value) -> Option<ImageReference> {
        for acceptance in [Acceptance::Supported, Acceptance::AnySubtype] {
            for matcher in &self.matchers {
                if let Some(found) = matcher.find(response, acceptance) {
                    debug!(matcher = matcher.name(), kind = found.kind(), ?acceptance, "Located image reference");
                    return Some(found);
                }
            }
        }
        debug!("No image reference found in provider response");
        None
    }
}

impl Default for PayloadLocator {
    fn default() -> Self {
        Self::with_matchers(vec![
            Box::new(DirectKeyMatcher::default()),
            Box::new(ArrayKeyMatcher::default()),
            Box::new(DeepScanMatcher),
        ])
    }
}
