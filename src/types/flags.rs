use bitflags::bitflags;

bitflags! {
    /// Attributes of a type
    pub struct TypeFlags: u16 {
        const PUBLIC = 0x0001;
        const INTERFACE = 0x0020;
        const ABSTRACT = 0x0080;
        const SEALED = 0x0100;

        /// Implemented by the host: instances are opaque Rust values
        const HOST = 0x0200;

        /// Generated at runtime (eg. proxy types)
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Attributes of a method
    pub struct MethodFlags: u16 {
        const PUBLIC = 0x0006;
        const STATIC = 0x0010;
        const FINAL = 0x0020;
        const VIRTUAL = 0x0040;
        const ABSTRACT = 0x0400;
        const SPECIAL_NAME = 0x0800;

        /// Instance constructor (`.ctor`)
        const CONSTRUCTOR = 0x1000;

        /// Declares its own generic parameters
        const GENERIC = 0x2000;
    }
}

impl MethodFlags {
    /// Flags for an overridable instance method
    pub const fn public_virtual() -> MethodFlags {
        MethodFlags::from_bits_truncate(MethodFlags::PUBLIC.bits() | MethodFlags::VIRTUAL.bits())
    }

    /// Flags for an interface method
    pub const fn interface_method() -> MethodFlags {
        MethodFlags::from_bits_truncate(
            MethodFlags::PUBLIC.bits() | MethodFlags::VIRTUAL.bits() | MethodFlags::ABSTRACT.bits(),
        )
    }

    /// Flags for an instance constructor
    pub const fn constructor() -> MethodFlags {
        MethodFlags::from_bits_truncate(
            MethodFlags::PUBLIC.bits()
                | MethodFlags::SPECIAL_NAME.bits()
                | MethodFlags::CONSTRUCTOR.bits(),
        )
    }
}
