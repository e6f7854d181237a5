use crate::Generator;

/// Generates random UUID v4 shorts in their hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl UuidGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Generator for UuidGenerator {
    fn generate(&self) -> String {
        ::uuid::Uuid::new_v4().to_string()
    }
}
