//! Tag-based unit configuration.
//!
//! Units are configured generically through self-describing tags: each
//! tag pairs a [`TagTypeId`] with a [`TagValue`]. A unit advertises the
//! tag types it accepts via [`Configurable::tag_ids`]; [`split_tags`]
//! partitions an incoming list accordingly so a composite unit can route
//! each slice to the child that understands it. The Set/Get/Query verbs
//! are dispatched per list by [`dispatch_tags`], which calls
//! `configure_tags` followed by `update`.
//!
//! # Example
//!
//! ```rust
//! use strand::tag::{TagList, TagTypeId, TagValue};
//!
//! const VOLUME: TagTypeId = TagTypeId::new(0x0100);
//!
//! let mut tags = TagList::new();
//! tags.set(VOLUME, 80u64);
//! assert_eq!(tags.get(VOLUME).and_then(TagValue::as_uint), Some(80));
//! ```

use crate::error::{Error, Result};

// ============================================================================
// Tag Identity & Value
// ============================================================================

/// Identifies one tag type.
///
/// The upper bits conventionally identify the advertising unit class, the
/// lower bits the parameter, so distinct unit classes never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagTypeId(pub u32);

impl TagTypeId {
    /// Create a tag type id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The unit-class portion (upper 16 bits).
    pub const fn class(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

/// Value carried by a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// String value.
    String(String),
    /// Unsigned integer.
    UInt(u64),
    /// Signed integer.
    Int(i64),
    /// Boolean value.
    Bool(bool),
    /// Binary data.
    Binary(Vec<u8>),
}

impl TagValue {
    /// Get as string if this is a String variant.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as u64 if this is a UInt variant.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            TagValue::UInt(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int variant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as bool if this is a Bool variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as bytes if this is a Binary variant.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            TagValue::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<u64> for TagValue {
    fn from(n: u64) -> Self {
        TagValue::UInt(n)
    }
}

impl From<u32> for TagValue {
    fn from(n: u32) -> Self {
        TagValue::UInt(n as u64)
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Int(n)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(b: Vec<u8>) -> Self {
        TagValue::Binary(b)
    }
}

// ============================================================================
// Tag List
// ============================================================================

/// One tag: a type id with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// The tag's type.
    pub id: TagTypeId,
    /// The tag's value.
    pub value: TagValue,
}

/// An ordered list of tags.
///
/// Order is preserved: units may depend on one parameter being applied
/// before another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagList {
    tags: Vec<Tag>,
}

impl TagList {
    /// Create an empty tag list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing any existing tag of the same type.
    pub fn set(&mut self, id: TagTypeId, value: impl Into<TagValue>) {
        let value = value.into();
        if let Some(tag) = self.tags.iter_mut().find(|t| t.id == id) {
            tag.value = value;
        } else {
            self.tags.push(Tag { id, value });
        }
    }

    /// Get a tag value by type.
    pub fn get(&self, id: TagTypeId) -> Option<&TagValue> {
        self.tags.iter().find(|t| t.id == id).map(|t| &t.value)
    }

    /// Remove a tag by type, returning its value.
    pub fn remove(&mut self, id: TagTypeId) -> Option<TagValue> {
        let pos = self.tags.iter().position(|t| t.id == id)?;
        Some(self.tags.remove(pos).value)
    }

    /// Iterate over the tags in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Get the number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Append a tag without replacing (used by the splitter).
    fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }
}

impl FromIterator<(TagTypeId, TagValue)> for TagList {
    fn from_iter<I: IntoIterator<Item = (TagTypeId, TagValue)>>(iter: I) -> Self {
        let mut list = TagList::new();
        for (id, value) in iter {
            list.set(id, value);
        }
        list
    }
}

// ============================================================================
// Verbs & Dispatch
// ============================================================================

/// Configuration verb applied to a tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigVerb {
    /// Apply the tag values to the unit.
    Set,
    /// Fill the tag values from the unit's current state.
    Get,
    /// Ask whether the unit would accept the tag values, without applying.
    Query,
}

/// A unit that can be configured through tags.
///
/// `configure_tags` handles the verb for the tags it advertised;
/// `update` is called afterwards so the unit can commit the batch to
/// hardware in one step.
pub trait Configurable {
    /// The tag types this unit accepts.
    fn tag_ids(&self) -> &[TagTypeId];

    /// Handle one partitioned tag list.
    fn configure_tags(&mut self, verb: ConfigVerb, tags: &mut TagList) -> Result<()>;

    /// Commit a completed configuration batch.
    fn update(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Partition `tags` into per-acceptor slices.
///
/// Returns one `TagList` per entry in `acceptors`, in the same order,
/// each containing the tags whose type the acceptor advertised. Tags no
/// acceptor claims are returned in the final "rejected" list; tags
/// claimed by several acceptors go to the first claimant, matching the
/// first-match routing of the splitter this models.
pub fn split_tags(tags: &TagList, acceptors: &[&[TagTypeId]]) -> (Vec<TagList>, TagList) {
    let mut slices: Vec<TagList> = (0..acceptors.len()).map(|_| TagList::new()).collect();
    let mut rejected = TagList::new();

    for tag in tags.iter() {
        match acceptors.iter().position(|ids| ids.contains(&tag.id)) {
            Some(i) => slices[i].push(tag.clone()),
            None => rejected.push(tag.clone()),
        }
    }

    (slices, rejected)
}

/// Dispatch a verb over a tag list to a configurable unit.
///
/// Tags the unit did not advertise are a protocol error: the splitter is
/// expected to have partitioned the list first.
pub fn dispatch_tags(
    unit: &mut dyn Configurable,
    verb: ConfigVerb,
    tags: &mut TagList,
) -> Result<()> {
    if let Some(tag) = tags.iter().find(|t| !unit.tag_ids().contains(&t.id)) {
        return Err(Error::InvalidParameter(format!(
            "tag type {:#x} not accepted by unit",
            tag.id.0
        )));
    }
    unit.configure_tags(verb, tags)?;
    unit.update()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAIN: TagTypeId = TagTypeId::new(0x0001_0001);
    const MUTE: TagTypeId = TagTypeId::new(0x0001_0002);
    const BRIGHTNESS: TagTypeId = TagTypeId::new(0x0002_0001);

    struct FakeRenderer {
        ids: Vec<TagTypeId>,
        gain: u64,
        updated: bool,
    }

    impl Configurable for FakeRenderer {
        fn tag_ids(&self) -> &[TagTypeId] {
            &self.ids
        }

        fn configure_tags(&mut self, verb: ConfigVerb, tags: &mut TagList) -> Result<()> {
            match verb {
                ConfigVerb::Set => {
                    if let Some(v) = tags.get(GAIN).and_then(TagValue::as_uint) {
                        self.gain = v;
                    }
                }
                ConfigVerb::Get => {
                    tags.set(GAIN, self.gain);
                }
                ConfigVerb::Query => {}
            }
            Ok(())
        }

        fn update(&mut self) -> Result<()> {
            self.updated = true;
            Ok(())
        }
    }

    #[test]
    fn test_tag_list_set_get() {
        let mut tags = TagList::new();
        tags.set(GAIN, 42u64);
        tags.set(MUTE, true);
        tags.set(GAIN, 43u64); // Replace

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get(GAIN).and_then(TagValue::as_uint), Some(43));
        assert_eq!(tags.get(MUTE).and_then(TagValue::as_bool), Some(true));
        assert!(tags.get(BRIGHTNESS).is_none());
    }

    #[test]
    fn test_tag_type_class() {
        assert_eq!(GAIN.class(), 1);
        assert_eq!(BRIGHTNESS.class(), 2);
    }

    #[test]
    fn test_split_tags_partitions() {
        let mut tags = TagList::new();
        tags.set(GAIN, 10u64);
        tags.set(BRIGHTNESS, 200u64);
        tags.set(MUTE, false);
        tags.set(TagTypeId::new(0xdead), 1u64);

        let audio: &[TagTypeId] = &[GAIN, MUTE];
        let video: &[TagTypeId] = &[BRIGHTNESS];
        let (slices, rejected) = split_tags(&tags, &[audio, video]);

        assert_eq!(slices[0].len(), 2);
        assert_eq!(slices[1].len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(slices[1].get(BRIGHTNESS).and_then(TagValue::as_uint), Some(200));
    }

    #[test]
    fn test_dispatch_set_then_update() {
        let mut unit = FakeRenderer {
            ids: vec![GAIN, MUTE],
            gain: 0,
            updated: false,
        };
        let mut tags = TagList::new();
        tags.set(GAIN, 55u64);

        dispatch_tags(&mut unit, ConfigVerb::Set, &mut tags).unwrap();
        assert_eq!(unit.gain, 55);
        assert!(unit.updated);
    }

    #[test]
    fn test_dispatch_rejects_unadvertised() {
        let mut unit = FakeRenderer {
            ids: vec![GAIN],
            gain: 0,
            updated: false,
        };
        let mut tags = TagList::new();
        tags.set(BRIGHTNESS, 1u64);

        assert!(dispatch_tags(&mut unit, ConfigVerb::Set, &mut tags).is_err());
        assert!(!unit.updated);
    }

    #[test]
    fn test_dispatch_get_fills_values() {
        let mut unit = FakeRenderer {
            ids: vec![GAIN],
            gain: 77,
            updated: false,
        };
        let mut tags = TagList::new();
        tags.set(GAIN, 0u64);

        dispatch_tags(&mut unit, ConfigVerb::Get, &mut tags).unwrap();
        assert_eq!(tags.get(GAIN).and_then(TagValue::as_uint), Some(77));
    }
}
