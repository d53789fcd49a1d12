//! Realtime interface packet layouts
//!
//! The realtime interface (port 30003) sends one fixed-size record per
//! controller cycle. Which fields the record carries depends on the
//! controller firmware: CB2 controllers (firmware 1.x) send a short record
//! padded with an `unused` block, CB3 and e-Series controllers append
//! fields with every release (safety mode, elbow kinematics, safety status).
//!
//! Every layout is built once by [`LayoutRegistry::new`] and never changes
//! afterwards. Field offsets are implicit: fields are laid out back to back
//! in declaration order, so the order in which a [`LayoutBuilder`] receives
//! them is the wire order.

use std::sync::{Arc, OnceLock};

use crate::version::FirmwareVersion;

/// Numeric element kinds used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I32,
    F64,
}

impl ElementType {
    /// Width of one element in bytes
    pub const fn width(self) -> usize {
        match self {
            ElementType::I32 => 4,
            ElementType::F64 => 8,
        }
    }
}

/// Multi-byte numeric byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// One named field of a packet layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: &'static str,
    element: ElementType,
    shape: Vec<usize>,
    byte_order: ByteOrder,
}

impl FieldSpec {
    /// Create a field. An empty `shape` describes a scalar.
    pub fn new(
        name: &'static str,
        element: ElementType,
        shape: Vec<usize>,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            name,
            element,
            shape,
            byte_order,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Number of elements (1 for scalars)
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes this field occupies in a packet
    pub fn byte_len(&self) -> usize {
        self.element.width() * self.element_count()
    }
}

/// Firmware families with distinct realtime layouts, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutFamily {
    /// CB2 before 1.7
    Cb2Legacy,
    Cb2V1_7,
    Cb2V1_8,
    Cb3V3_0,
    Cb3V3_2,
    Cb3V3_5,
    /// CB3 3.10 and later, e-Series 5.4 and later
    Cb3V3_10,
}

impl LayoutFamily {
    pub const ALL: [LayoutFamily; 7] = [
        LayoutFamily::Cb2Legacy,
        LayoutFamily::Cb2V1_7,
        LayoutFamily::Cb2V1_8,
        LayoutFamily::Cb3V3_0,
        LayoutFamily::Cb3V3_2,
        LayoutFamily::Cb3V3_5,
        LayoutFamily::Cb3V3_10,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LayoutFamily::Cb2Legacy => "cb2-legacy",
            LayoutFamily::Cb2V1_7 => "cb2-1.7",
            LayoutFamily::Cb2V1_8 => "cb2-1.8",
            LayoutFamily::Cb3V3_0 => "cb3-3.0",
            LayoutFamily::Cb3V3_2 => "cb3-3.2",
            LayoutFamily::Cb3V3_5 => "cb3-3.5",
            LayoutFamily::Cb3V3_10 => "cb3-3.10",
        }
    }

    /// Pick the family for a firmware version.
    ///
    /// Ranges are tested newest first and the first match wins. The two
    /// newest ranges overlap: 5.4 satisfies both `>= 5.4` and `<= 5.4`, and
    /// resolves to the newer layout. Versions below every threshold, zero
    /// and negative ones included, fall back to the legacy layout without an
    /// error.
    pub fn for_version(version: FirmwareVersion) -> Self {
        const V1_7: FirmwareVersion = FirmwareVersion::new(1, 7);
        const V1_8: FirmwareVersion = FirmwareVersion::new(1, 8);
        const V3_0: FirmwareVersion = FirmwareVersion::new(3, 0);
        const V3_2: FirmwareVersion = FirmwareVersion::new(3, 2);
        const V3_5: FirmwareVersion = FirmwareVersion::new(3, 5);
        const V3_10: FirmwareVersion = FirmwareVersion::new(3, 10);
        const V5_4: FirmwareVersion = FirmwareVersion::new(5, 4);

        if version >= V3_10 || version >= V5_4 {
            LayoutFamily::Cb3V3_10
        } else if version >= V3_5 && version <= V5_4 {
            LayoutFamily::Cb3V3_5
        } else if version >= V3_2 {
            LayoutFamily::Cb3V3_2
        } else if version >= V3_0 {
            LayoutFamily::Cb3V3_0
        } else if version >= V1_8 {
            LayoutFamily::Cb2V1_8
        } else if version >= V1_7 {
            LayoutFamily::Cb2V1_7
        } else {
            LayoutFamily::Cb2Legacy
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Ordered field schema with its total byte size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLayout {
    family: LayoutFamily,
    fields: Vec<FieldSpec>,
    total_size: usize,
}

impl PacketLayout {
    pub fn builder(family: LayoutFamily) -> LayoutBuilder {
        LayoutBuilder {
            family,
            fields: Vec::new(),
        }
    }

    pub fn family(&self) -> LayoutFamily {
        self.family
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Byte offset of a field from the start of the packet
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for field in &self.fields {
            if field.name == name {
                return Some(offset);
            }
            offset += field.byte_len();
        }
        None
    }

    /// Sum of all field extents; the exact packet size on the wire
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

/// Append-only construction of a [`PacketLayout`]
#[derive(Debug)]
pub struct LayoutBuilder {
    family: LayoutFamily,
    fields: Vec<FieldSpec>,
}

impl LayoutBuilder {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Big-endian `i32` scalar
    pub fn int32(self, name: &'static str) -> Self {
        self.field(FieldSpec::new(name, ElementType::I32, Vec::new(), ByteOrder::BigEndian))
    }

    /// Big-endian `f64` scalar
    pub fn float64(self, name: &'static str) -> Self {
        self.field(FieldSpec::new(name, ElementType::F64, Vec::new(), ByteOrder::BigEndian))
    }

    /// Big-endian `f64` vector of `len` elements
    pub fn float64_vec(self, name: &'static str, len: usize) -> Self {
        self.field(FieldSpec::new(name, ElementType::F64, vec![len], ByteOrder::BigEndian))
    }

    pub fn build(self) -> PacketLayout {
        let total_size = self.fields.iter().map(FieldSpec::byte_len).sum();
        PacketLayout {
            family: self.family,
            fields: self.fields,
            total_size,
        }
    }
}

/// Immutable table of every known realtime layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRegistry {
    layouts: Vec<PacketLayout>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        let layouts = LayoutFamily::ALL
            .iter()
            .map(|&family| build_layout(family))
            .collect();
        Self { layouts }
    }

    /// Process-wide registry, built on first use
    pub fn shared() -> Arc<LayoutRegistry> {
        static SHARED: OnceLock<Arc<LayoutRegistry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(LayoutRegistry::new())).clone()
    }

    /// Layout for a firmware version
    pub fn resolve(&self, version: FirmwareVersion) -> &PacketLayout {
        self.layout(LayoutFamily::for_version(version))
    }

    /// Expected packet size for a firmware version
    pub fn packet_size(&self, version: FirmwareVersion) -> usize {
        self.resolve(version).total_size()
    }

    pub fn layout(&self, family: LayoutFamily) -> &PacketLayout {
        &self.layouts[family.index()]
    }

    pub fn layouts(&self) -> impl Iterator<Item = &PacketLayout> {
        self.layouts.iter()
    }
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_layout(family: LayoutFamily) -> PacketLayout {
    let builder = PacketLayout::builder(family);
    match family {
        LayoutFamily::Cb2Legacy => cb2_fields(builder).build(),
        LayoutFamily::Cb2V1_7 => cb2_fields(builder).float64("robot_mode").build(),
        LayoutFamily::Cb2V1_8 => cb2_fields(builder)
            .float64("robot_mode")
            .float64_vec("joint_modes", 6)
            .build(),
        LayoutFamily::Cb3V3_0 => cb3_fields(builder).build(),
        LayoutFamily::Cb3V3_2 => cb3_v3_2_fields(builder).build(),
        LayoutFamily::Cb3V3_5 => cb3_v3_5_fields(builder).build(),
        LayoutFamily::Cb3V3_10 => cb3_v3_5_fields(builder).float64("safety_status").build(),
    }
}

/// Header and joint block shared by every firmware
fn joint_header(builder: LayoutBuilder) -> LayoutBuilder {
    builder
        .int32("message_size")
        .float64("time")
        .float64_vec("q_target", 6)
        .float64_vec("qd_target", 6)
        .float64_vec("qdd_target", 6)
        .float64_vec("i_target", 6)
        .float64_vec("m_target", 6)
        .float64_vec("q_actual", 6)
        .float64_vec("qd_actual", 6)
        .float64_vec("i_actual", 6)
}

fn cb2_fields(builder: LayoutBuilder) -> LayoutBuilder {
    joint_header(builder)
        .float64_vec("tool_accelerometer_values", 3)
        .float64_vec("unused", 15)
        .float64_vec("tcp_force", 6)
        .float64_vec("tool_vector", 6)
        .float64_vec("tcp_speed", 6)
        .float64("digital_input_bits")
        .float64_vec("motor_temperatures", 6)
        .float64("controller_timer")
        .float64("test_value")
}

fn cb3_fields(builder: LayoutBuilder) -> LayoutBuilder {
    joint_header(builder)
        .float64_vec("i_control", 6)
        .float64_vec("tool_vector_actual", 6)
        .float64_vec("tcp_speed_actual", 6)
        .float64_vec("tcp_force", 6)
        .float64_vec("tool_vector_target", 6)
        .float64_vec("tcp_speed_target", 6)
        .float64("digital_input_bits")
        .float64_vec("motor_temperatures", 6)
        .float64("controller_timer")
        .float64("test_value")
        .float64("robot_mode")
        .float64_vec("joint_modes", 6)
        .float64("safety_mode")
        .float64_vec("reserved_0", 6)
        .float64_vec("tool_accelerometer_values", 3)
        .float64_vec("reserved_1", 6)
        .float64("speed_scaling")
        .float64("linear_momentum_norm")
        .float64("reserved_2")
        .float64("reserved_3")
        .float64("v_main")
        .float64("v_robot")
        .float64("i_robot")
        .float64_vec("v_actual", 6)
}

fn cb3_v3_2_fields(builder: LayoutBuilder) -> LayoutBuilder {
    cb3_fields(builder).float64("digital_outputs").float64("program_state")
}

fn cb3_v3_5_fields(builder: LayoutBuilder) -> LayoutBuilder {
    cb3_v3_2_fields(builder)
        .float64_vec("elbow_position", 3)
        .float64_vec("elbow_velocity", 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: i32, minor: i32) -> FirmwareVersion {
        FirmwareVersion::new(major, minor)
    }

    #[test]
    fn test_packet_sizes_per_firmware_range() {
        let registry = LayoutRegistry::new();

        let cases = [
            (v(0, 0), 756),
            (v(1, 6), 756),
            (v(1, 7), 764),
            (v(1, 8), 812),
            (v(3, 0), 1044),
            (v(3, 1), 1044),
            (v(3, 2), 1060),
            (v(3, 4), 1060),
            (v(3, 5), 1108),
            (v(3, 9), 1108),
            (v(3, 10), 1116),
            (v(3, 15), 1116),
            (v(5, 0), 1116),
            (v(5, 4), 1116),
            (v(5, 11), 1116),
        ];

        for (version, expected) in cases {
            assert_eq!(
                registry.packet_size(version),
                expected,
                "unexpected packet size for firmware {}",
                version
            );
        }
    }

    #[test]
    fn test_unknown_versions_fall_back_to_legacy() {
        assert_eq!(LayoutFamily::for_version(v(-1, 0)), LayoutFamily::Cb2Legacy);
        assert_eq!(LayoutFamily::for_version(v(0, 0)), LayoutFamily::Cb2Legacy);
        assert_eq!(LayoutFamily::for_version(v(1, 0)), LayoutFamily::Cb2Legacy);
    }

    #[test]
    fn test_overlapping_high_ranges_pick_newest_layout() {
        // 5.4 sits on the boundary of both high ranges
        assert_eq!(LayoutFamily::for_version(v(5, 4)), LayoutFamily::Cb3V3_10);
        assert_eq!(LayoutFamily::for_version(v(3, 10)), LayoutFamily::Cb3V3_10);
        // 4.x is past 3.10 and takes the newest layout as well
        assert_eq!(LayoutFamily::for_version(v(4, 0)), LayoutFamily::Cb3V3_10);
    }

    #[test]
    fn test_total_size_is_sum_of_fields() {
        let registry = LayoutRegistry::new();
        for layout in registry.layouts() {
            let sum: usize = layout.fields().iter().map(|f| f.byte_len()).sum();
            assert_eq!(sum, layout.total_size(), "{}", layout.family().name());
            assert_eq!(layout.fields()[0].name(), "message_size");
            assert_eq!(layout.fields()[0].element(), ElementType::I32);
        }
    }

    #[test]
    fn test_cb2_layout_uses_unused_block() {
        let registry = LayoutRegistry::new();
        let layout = registry.resolve(v(1, 8));

        assert_eq!(layout.field("unused").unwrap().element_count(), 15);
        assert!(layout.field("safety_mode").is_none());
        assert!(layout.field("tool_vector").is_some());
        assert_eq!(layout.offset_of("tool_vector"), Some(4 + 8 + 8 * 48 + 24 + 120 + 48));
    }

    #[test]
    fn test_newer_layouts_extend_older_ones() {
        let registry = LayoutRegistry::new();
        let pairs = [
            (LayoutFamily::Cb2Legacy, LayoutFamily::Cb2V1_7),
            (LayoutFamily::Cb2V1_7, LayoutFamily::Cb2V1_8),
            (LayoutFamily::Cb3V3_0, LayoutFamily::Cb3V3_2),
            (LayoutFamily::Cb3V3_2, LayoutFamily::Cb3V3_5),
            (LayoutFamily::Cb3V3_5, LayoutFamily::Cb3V3_10),
        ];

        for (older, newer) in pairs {
            let older = registry.layout(older).fields();
            let newer = registry.layout(newer).fields();
            assert!(newer.len() > older.len());
            assert_eq!(&newer[..older.len()], older);
        }

        let newest = registry.layout(LayoutFamily::Cb3V3_10);
        assert_eq!(newest.fields().last().unwrap().name(), "safety_status");
        assert_eq!(newest.offset_of("safety_status"), Some(1108));
    }

    #[test]
    fn test_field_spec_extent() {
        let scalar = FieldSpec::new("time", ElementType::F64, Vec::new(), ByteOrder::BigEndian);
        assert!(scalar.is_scalar());
        assert_eq!(scalar.element_count(), 1);
        assert_eq!(scalar.byte_len(), 8);

        let matrix = FieldSpec::new("m", ElementType::I32, vec![2, 3], ByteOrder::LittleEndian);
        assert_eq!(matrix.element_count(), 6);
        assert_eq!(matrix.byte_len(), 24);
    }

    #[test]
    fn test_shared_registry_is_single_instance() {
        let a = LayoutRegistry::shared();
        let b = LayoutRegistry::shared();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, LayoutRegistry::new());
    }
}
