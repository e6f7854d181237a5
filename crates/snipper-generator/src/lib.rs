pub mod seq;
pub mod uuid;

pub use seq::SeqGenerator;
pub use uuid::UuidGenerator;

/// Trait for generating short identifiers.
///
/// Implementations are pure generators that don't interact with storage.
/// A generated short that collides with a stored one is rejected by the
/// storage as a conflict; no retry is performed.
pub trait Generator: Send + Sync + 'static {
    /// Returns the next short identifier.
    fn generate(&self) -> String;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self) -> String {
        (**self).generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxed_generators_are_generators() {
        let generators: Vec<Box<dyn Generator>> = vec![
            Box::new(SeqGenerator::new()),
            Box::new(UuidGenerator::new()),
        ];

        for generator in &generators {
            assert_ne!(generator.generate(), generator.generate());
        }
    }
}
