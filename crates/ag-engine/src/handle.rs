//! Explicitly destroyable engine handle.

use crate::engine::{Engine, EngineError};

/// Owns an [`Engine`] until [`EngineHandle::destroy`] is called.
///
/// Destroying twice is a no-op; any access after the first destroy yields
/// [`EngineError::Destroyed`].
#[derive(Debug, Default)]
pub struct EngineHandle {
    engine: Option<Engine>,
}

impl EngineHandle {
    pub fn create(rules: &str) -> Self {
        Self::from_engine(Engine::from_rules(rules))
    }

    pub fn from_engine(engine: Engine) -> Self {
        Self { engine: Some(engine) }
    }

    pub fn engine(&self) -> Result<&Engine, EngineError> {
        self.engine.as_ref().ok_or(EngineError::Destroyed)
    }

    pub fn engine_mut(&mut self) -> Result<&mut Engine, EngineError> {
        self.engine.as_mut().ok_or(EngineError::Destroyed)
    }

    /// Drop the engine. Returns `false` if it was already destroyed.
    pub fn destroy(&mut self) -> bool {
        match self.engine.take() {
            Some(_) => {
                log::debug!("Engine destroyed");
                true
            }
            None => false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.engine.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_is_idempotent() {
        let mut handle = EngineHandle::create("||ads.example.com^");
        assert!(handle
            .engine()
            .expect("live engine")
            .check_network_request("https://ads.example.com/", "", "", true, "script")
            .is_blocked());

        assert!(handle.destroy());
        assert!(!handle.destroy());
        assert!(handle.is_destroyed());
        assert_eq!(handle.engine().err(), Some(EngineError::Destroyed));
        assert!(matches!(handle.engine_mut(), Err(EngineError::Destroyed)));
    }

    #[test]
    fn mutation_through_handle() {
        let mut handle = EngineHandle::default();
        assert!(handle.is_destroyed());

        let mut handle = EngineHandle::from_engine(Engine::default());
        handle.engine_mut().expect("live engine").add_tag("social");
        assert!(handle.engine().expect("live engine").tag_exists("social"));
    }
}
