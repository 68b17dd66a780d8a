//! Reserved names used by the persisted graph projection
//!
//! Every node written by the mapper carries a `__type__` property; type nodes
//! additionally carry `id` and `attrs`. Only `__type__` is reserved as an
//! attribute name — `id` stays free for the common unique-identifier
//! attribute, and `id`/`attrs` are only special on type nodes.

// ============================================================================
// Reserved property names
// ============================================================================

/// Property holding the type id of the object a node/edge was mapped from
pub const PROP_TYPE: &str = "__type__";

/// Property holding a type node's own type id
pub const PROP_ID: &str = "id";

/// Property holding the JSON projection of a type's declared descriptors
pub const PROP_ATTRS: &str = "attrs";

/// Names rejected as user attribute names at registration time
pub const RESERVED_PROPS: [&str; 1] = [PROP_TYPE];

// ============================================================================
// Structural edge kinds
// ============================================================================

/// Edge kind linking a type node to each of its direct bases
pub const REL_ISA: &str = "ISA";

/// Edge kind linking an instance node/edge to its exact type node
pub const REL_INSTANCE_OF: &str = "INSTANCEOF";

/// Edge property recording a base's declared position (parent order)
pub const PROP_BASE_INDEX: &str = "base_index";

// ============================================================================
// Type-node identity
// ============================================================================

/// The `__type__` value shared by all type nodes
pub const TYPE_NODE_TYPE: &str = "PersistableType";
