use std::borrow::Cow;

/// A control port: a single automatable value.
#[derive(Clone, Debug, PartialEq)]
pub struct Port {
    pub index: u32,
    pub name: Cow<'static, str>,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl Port {
    pub const fn new(index: u32, name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            index,
            name: Cow::Borrowed(name),
            min,
            max,
            default,
        }
    }

    /// Clamp `value` into the port's range. NaN becomes the default.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }
}

/// Look up a port by index.
pub fn find(ports: &[Port], index: u32) -> Option<&Port> {
    ports.iter().find(|p| p.index == index)
}
