use thiserror::Error;

use crate::backend::BackendError;
use crate::composer::ComposeError;
use crate::config::ConfigError;
use crate::session::SessionError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum ClinicError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::ValidationError;

    fn lookup(store: &crate::storage::ClinicStore) -> Result<(), ClinicError> {
        store.get_client(3)?;
        Ok(())
    }

    #[test]
    fn test_conversions_keep_message() {
        let err = lookup(&crate::storage::ClinicStore::new()).unwrap_err();
        assert!(matches!(err, ClinicError::Store(StoreError::NotFound { id: 3, .. })));
        assert_eq!(err.to_string(), "client 3 not found");

        let err: ClinicError = ComposeError::from(ValidationError::NoProcedure).into();
        assert_eq!(err.to_string(), "validation failed: no procedure selected");
    }
}
