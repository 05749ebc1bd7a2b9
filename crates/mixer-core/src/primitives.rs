//! # Mixer Primitives
//!
//! Compiled-in constants shared by the codec, the record loader and the
//! serving path. None of these are configurable at runtime.

/// Magic bytes opening every encoded payload cell.
pub const PAYLOAD_MAGIC: &[u8; 2] = b"MX";

/// Current payload format version.
///
/// Increment this when making breaking changes to the payload body layout.
pub const PAYLOAD_VERSION: u8 = 1;

/// Separator between the components of a row key.
pub const KEY_SEPARATOR: char = '^';

/// Escape character for separators and itself inside key components.
pub const KEY_ESCAPE: char = '\\';

/// Predicate whose literal object is the display name of the subject.
pub const NAME_PREDICATE: &str = "name";

/// Predicate whose object is a type of the subject.
pub const TYPE_PREDICATE: &str = "typeOf";

/// Predicate linking a place to the place that contains it.
pub const CONTAINED_IN_PLACE: &str = "containedInPlace";

/// Neighbor group for literal values.
pub const LITERAL_TYPE: &str = "Text";

/// Neighbor group for entities with no known type.
pub const UNTYPED_ENTITY_TYPE: &str = "Thing";

// =============================================================================
// REQUEST LIMITS
// =============================================================================

/// Maximum number of entity ids accepted in a single request.
pub const MAX_ENTITIES_PER_REQUEST: usize = 500;

/// Maximum number of stat vars accepted in a single stat request.
pub const MAX_STAT_VARS_PER_REQUEST: usize = 100;

/// Maximum length of an entity id, predicate or type filter.
pub const MAX_COMPONENT_LENGTH: usize = 1024;
