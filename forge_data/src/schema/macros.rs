//! Descriptor-generation macros. Descriptors are hand-listed rather than
//! derived so the wire format stays visible in one place.

macro_rules! count_idents {
    () => (0usize);
    ($head:ident $(, $tail:ident)*) => (1usize + count_idents!($($tail),*));
}

macro_rules! main_types {
    ($($name:ident),* $(,)?) => {
        /// Broad category tag used for config-key typing.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum MainType {
            $($name),*
        }

        impl MainType {
            pub const ALL: &'static [MainType] = &[$(MainType::$name),*];
            pub const COUNT: u64 = Self::ALL.len() as u64;

            pub fn from_raw(raw: u64) -> Option<Self> {
                Self::ALL.get(raw as usize).copied()
            }

            pub fn to_raw(self) -> u64 {
                self as u64
            }
        }
    };
}

macro_rules! indexable_struct_types {
    ($($name:ident),* $(,)?) => {
        /// Stable tag naming a category of serializable struct that gets its
        /// own per-type index table in packages.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum IndexableStructType {
            $($name),*
        }

        impl IndexableStructType {
            pub const ALL: &'static [IndexableStructType] = &[$(IndexableStructType::$name),*];
            pub const COUNT: usize = Self::ALL.len();

            pub fn from_raw(raw: u64) -> Option<Self> {
                Self::ALL.get(raw as usize).copied()
            }

            pub fn index(self) -> usize {
                self as usize
            }
        }
    };
}

macro_rules! reflect_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $main:ident {
            $first:ident
            $(, $rest:ident)* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            #[default]
            $first,
            $($rest,)*
        }

        impl $crate::schema::ReflectEnum for $name {
            const TYPE: &'static $crate::schema::EnumType = &$crate::schema::EnumType {
                name: stringify!($name),
                main_type: $crate::schema::MainType::$main,
                options: &[
                    $crate::schema::EnumOption {
                        name: stringify!($first),
                        value: $name::$first as u64,
                    },
                    $(
                        $crate::schema::EnumOption {
                            name: stringify!($rest),
                            value: $name::$rest as u64,
                        },
                    )*
                ],
                max_value_exclusive: count_idents!($first $(, $rest)*) as u64,
            };

            fn to_raw(self) -> u64 {
                self as u64
            }

            fn from_raw(raw: u64) -> Option<Self> {
                match raw {
                    x if x == $name::$first as u64 => Some($name::$first),
                    $(x if x == $name::$rest as u64 => Some($name::$rest),)*
                    _ => None,
                }
            }
        }
    };
}

macro_rules! field_visibility {
    (visible) => {
        true
    };
    (hidden) => {
        false
    };
}

macro_rules! field_get {
    ($owner:ty, $field:ident, enum_v) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::Enum(&$crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, number) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::Number(&$crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, strct) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::struct_value(&$crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, value_type) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::ValueType(&$crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, global_str) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::GlobalString($crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, temp_str) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::TempString($crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, ptr) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::ObjectPtr(&$crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, span) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::ObjectSpan(&$crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
    ($owner:ty, $field:ident, content) => {{
        fn get<'a>(obj: &'a dyn ::std::any::Any) -> $crate::schema::Value<'a> {
            $crate::schema::Value::BinaryContent($crate::schema::cast::<$owner>(obj).$field)
        }
        get
    }};
}

macro_rules! field_get_mut {
    ($owner:ty, $field:ident, enum_v) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::Enum(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, number) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::Number(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, strct) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::struct_value_mut(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, value_type) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::ValueType(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, global_str) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::GlobalString(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, temp_str) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::TempString(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, ptr) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::ObjectPtr(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, span) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::ObjectSpan(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
    ($owner:ty, $field:ident, content) => {{
        fn get_mut<'a>(obj: &'a mut dyn ::std::any::Any) -> $crate::schema::ValueMut<'a> {
            $crate::schema::ValueMut::BinaryContent(&mut $crate::schema::cast_mut::<$owner>(obj).$field)
        }
        get_mut
    }};
}

macro_rules! reflect_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident : $main:ident / $indexable:ident {
            $( $vis:ident $fname:literal $kind:ident $field:ident : $fty:ty, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default)]
        pub struct $name {
            $( pub $field: $fty, )*
        }

        impl $crate::schema::ReflectStruct for $name {
            const TYPE: &'static $crate::schema::StructType = &$crate::schema::StructType {
                name: stringify!($name),
                main_type: $crate::schema::MainType::$main,
                indexable: $crate::schema::IndexableStructType::$indexable,
                create: {
                    fn create() -> $crate::schema::BoxAny {
                        Box::new(<$name as Default>::default())
                    }
                    create
                },
                fields: &[
                    $(
                        $crate::schema::FieldDef {
                            name: $fname,
                            visible: field_visibility!($vis),
                            get: field_get!($name, $field, $kind),
                            get_mut: field_get_mut!($name, $field, $kind),
                        },
                    )*
                ],
            };
        }
    };
}

macro_rules! reflect_number {
    ($ty:ty, $main:ident, UnsignedInt, $bits:ident) => {
        impl $crate::schema::ReflectNumber for $ty {
            const TYPE: $crate::schema::NumberType = $crate::schema::NumberType {
                main_type: $crate::schema::MainType::$main,
                repr: $crate::schema::NumberRepr::UnsignedInt,
                bits: $crate::schema::NumberBits::$bits,
            };

            fn to_scalar(self) -> $crate::schema::Scalar {
                $crate::schema::Scalar::UInt(self as u64)
            }

            fn from_scalar(scalar: $crate::schema::Scalar) -> forge_common::Result<Self> {
                match scalar {
                    $crate::schema::Scalar::UInt(value) => {
                        value.try_into().map_err(|_| forge_common::Error::IntegerOverflow)
                    }
                    _ => Err(forge_common::Error::MalformedFile),
                }
            }
        }
    };
    ($ty:ty, $main:ident, SignedInt, $bits:ident) => {
        impl $crate::schema::ReflectNumber for $ty {
            const TYPE: $crate::schema::NumberType = $crate::schema::NumberType {
                main_type: $crate::schema::MainType::$main,
                repr: $crate::schema::NumberRepr::SignedInt,
                bits: $crate::schema::NumberBits::$bits,
            };

            fn to_scalar(self) -> $crate::schema::Scalar {
                $crate::schema::Scalar::SInt(self as i64)
            }

            fn from_scalar(scalar: $crate::schema::Scalar) -> forge_common::Result<Self> {
                match scalar {
                    $crate::schema::Scalar::SInt(value) => {
                        value.try_into().map_err(|_| forge_common::Error::IntegerOverflow)
                    }
                    _ => Err(forge_common::Error::MalformedFile),
                }
            }
        }
    };
}
