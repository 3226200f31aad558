//! Slot traits: uniform access to field storage regardless of whether the
//! field is plain, configurable, nullable or a span.

use std::sync::Arc;

use forge_common::{Error, Result};

use super::{
    downcast_arc, ArcAny, ConfigNameIndex, Configurable, ConfigurableRead, EnumType, NumberBits,
    NumberRepr, NumberType, ObjectRef, ReflectEnum, ReflectNumber, ReflectStruct, Scalar,
    StructType,
};

pub trait EnumSlot {
    fn enum_type(&self) -> &'static EnumType;
    fn is_configurable(&self) -> bool;
    fn read(&self) -> ConfigurableRead<u64>;
    fn set_explicit(&mut self, value: u64) -> Result<()>;
    fn set_configured(&mut self, key: ConfigNameIndex) -> Result<()>;
}

impl<T: ReflectEnum> EnumSlot for T {
    fn enum_type(&self) -> &'static EnumType {
        T::TYPE
    }

    fn is_configurable(&self) -> bool {
        false
    }

    fn read(&self) -> ConfigurableRead<u64> {
        ConfigurableRead::Plain(self.to_raw())
    }

    fn set_explicit(&mut self, value: u64) -> Result<()> {
        *self = T::from_raw(value).ok_or(Error::MalformedFile)?;
        Ok(())
    }

    fn set_configured(&mut self, _key: ConfigNameIndex) -> Result<()> {
        Err(Error::InvalidParameter("value is not configurable"))
    }
}

impl<T: ReflectEnum> EnumSlot for Configurable<T> {
    fn enum_type(&self) -> &'static EnumType {
        T::TYPE
    }

    fn is_configurable(&self) -> bool {
        true
    }

    fn read(&self) -> ConfigurableRead<u64> {
        match self {
            Configurable::Default => ConfigurableRead::Default,
            Configurable::Configured(key) => ConfigurableRead::Configured(*key),
            Configurable::Explicit(value) => ConfigurableRead::Explicit(value.to_raw()),
        }
    }

    fn set_explicit(&mut self, value: u64) -> Result<()> {
        *self = Configurable::Explicit(T::from_raw(value).ok_or(Error::MalformedFile)?);
        Ok(())
    }

    fn set_configured(&mut self, key: ConfigNameIndex) -> Result<()> {
        *self = Configurable::Configured(key);
        Ok(())
    }
}

pub trait NumberSlot {
    fn number_type(&self) -> NumberType;
    fn is_configurable(&self) -> bool;
    fn read(&self) -> ConfigurableRead<Scalar>;
    fn set_explicit(&mut self, value: Scalar) -> Result<()>;
    fn set_configured(&mut self, key: ConfigNameIndex) -> Result<()>;
}

impl<T: ReflectNumber> NumberSlot for T {
    fn number_type(&self) -> NumberType {
        T::TYPE
    }

    fn is_configurable(&self) -> bool {
        false
    }

    fn read(&self) -> ConfigurableRead<Scalar> {
        ConfigurableRead::Plain(self.to_scalar())
    }

    fn set_explicit(&mut self, value: Scalar) -> Result<()> {
        *self = T::from_scalar(value)?;
        Ok(())
    }

    fn set_configured(&mut self, _key: ConfigNameIndex) -> Result<()> {
        Err(Error::InvalidParameter("value is not configurable"))
    }
}

impl<T: ReflectNumber> NumberSlot for Configurable<T> {
    fn number_type(&self) -> NumberType {
        T::TYPE
    }

    fn is_configurable(&self) -> bool {
        true
    }

    fn read(&self) -> ConfigurableRead<Scalar> {
        match self {
            Configurable::Default => ConfigurableRead::Default,
            Configurable::Configured(key) => ConfigurableRead::Configured(*key),
            Configurable::Explicit(value) => ConfigurableRead::Explicit(value.to_scalar()),
        }
    }

    fn set_explicit(&mut self, value: Scalar) -> Result<()> {
        *self = Configurable::Explicit(T::from_scalar(value)?);
        Ok(())
    }

    fn set_configured(&mut self, key: ConfigNameIndex) -> Result<()> {
        *self = Configurable::Configured(key);
        Ok(())
    }
}

pub trait ObjectPtrSlot {
    fn target_type(&self) -> &'static StructType;
    fn nullable(&self) -> bool;
    fn read(&self) -> Option<ObjectRef<'_>>;
    fn set(&mut self, obj: Option<ArcAny>) -> Result<()>;
}

impl<T: ReflectStruct> ObjectPtrSlot for Option<Arc<T>> {
    fn target_type(&self) -> &'static StructType {
        T::TYPE
    }

    fn nullable(&self) -> bool {
        true
    }

    fn read(&self) -> Option<ObjectRef<'_>> {
        self.as_ref().map(ObjectRef::from_arc)
    }

    fn set(&mut self, obj: Option<ArcAny>) -> Result<()> {
        *self = match obj {
            None => None,
            Some(any) => Some(downcast_arc::<T>(any)?),
        };
        Ok(())
    }
}

pub trait ObjectSpanSlot {
    fn element_type(&self) -> &'static StructType;
    fn read(&self) -> Vec<Option<ObjectRef<'_>>>;
    fn set(&mut self, items: Vec<Option<ArcAny>>) -> Result<()>;
}

impl<T: ReflectStruct> ObjectSpanSlot for Vec<Arc<T>> {
    fn element_type(&self) -> &'static StructType {
        T::TYPE
    }

    fn read(&self) -> Vec<Option<ObjectRef<'_>>> {
        self.iter().map(|arc| Some(ObjectRef::from_arc(arc))).collect()
    }

    fn set(&mut self, items: Vec<Option<ArcAny>>) -> Result<()> {
        *self = items
            .into_iter()
            .map(|item| downcast_arc::<T>(item.ok_or(Error::MalformedFile)?))
            .collect::<Result<_>>()?;
        Ok(())
    }
}

impl<T: ReflectStruct> ObjectSpanSlot for Vec<Option<Arc<T>>> {
    fn element_type(&self) -> &'static StructType {
        T::TYPE
    }

    fn read(&self) -> Vec<Option<ObjectRef<'_>>> {
        self.iter()
            .map(|item| item.as_ref().map(ObjectRef::from_arc))
            .collect()
    }

    fn set(&mut self, items: Vec<Option<ArcAny>>) -> Result<()> {
        *self = items
            .into_iter()
            .map(|item| item.map(downcast_arc::<T>).transpose())
            .collect::<Result<_>>()?;
        Ok(())
    }
}

reflect_number!(u8, UInt8, UnsignedInt, Bits8);
reflect_number!(u16, UInt16, UnsignedInt, Bits16);
reflect_number!(u32, UInt32, UnsignedInt, Bits32);
reflect_number!(u64, UInt64, UnsignedInt, Bits64);
reflect_number!(i8, SInt8, SignedInt, Bits8);
reflect_number!(i16, SInt16, SignedInt, Bits16);
reflect_number!(i32, SInt32, SignedInt, Bits32);
reflect_number!(i64, SInt64, SignedInt, Bits64);

impl ReflectNumber for bool {
    const TYPE: NumberType = NumberType {
        main_type: super::MainType::Bool,
        repr: NumberRepr::UnsignedInt,
        bits: NumberBits::Bits1,
    };

    fn to_scalar(self) -> Scalar {
        Scalar::UInt(self as u64)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self> {
        match scalar {
            Scalar::UInt(0) => Ok(false),
            Scalar::UInt(1) => Ok(true),
            _ => Err(Error::MalformedFile),
        }
    }
}

impl ReflectNumber for f32 {
    const TYPE: NumberType = NumberType {
        main_type: super::MainType::Float32,
        repr: NumberRepr::Float,
        bits: NumberBits::Bits32,
    };

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self as f64)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self> {
        match scalar {
            Scalar::Float(value) => Ok(value as f32),
            _ => Err(Error::MalformedFile),
        }
    }
}

impl ReflectNumber for f64 {
    const TYPE: NumberType = NumberType {
        main_type: super::MainType::Float64,
        repr: NumberRepr::Float,
        bits: NumberBits::Bits64,
    };

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self> {
        match scalar {
            Scalar::Float(value) => Ok(value),
            _ => Err(Error::MalformedFile),
        }
    }
}
