//! device-registry: device profiles, the value codec and the profile compiler

mod types;
pub use types::*;

mod error;
pub use error::{CodecError, ProfileError, Result};

mod loader;
pub use loader::{
    load_catalog_dir, load_device_file, load_profile_file, load_profiles_dir, DeviceRegistry,
};

mod property;
pub use property::{
    Access, BitLayout, Encoding, PropertyDescriptor, Transform, ValueKind, MAX_SIZE_NIBBLES,
};

mod decode;
pub use decode::{decode, format_raw, parse_raw, raw_text, DecodeMode};

mod encode;
pub use encode::{encode, field_value, masked_merge, resolve_argument, WriteValue};

mod descriptors;
pub use descriptors::ValueDescriptorRegistry;

mod compiler;
pub use compiler::{
    compile_profile, CommandOps, CommandTable, Compiled, DeviceTables, ObjectDescriptor,
};
