//! Database module

pub mod complaints;
pub mod organizations;
mod pool;
pub mod users;

pub use pool::*;

/// Integrity constraint a failed write ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    Unique,
    ForeignKey,
}

impl ConstraintViolation {
    /// Postgres SQLSTATE class 23 codes
    fn from_sqlstate(code: &str) -> Option<Self> {
        match code {
            "23505" => Some(Self::Unique),
            "23503" => Some(Self::ForeignKey),
            _ => None,
        }
    }

    pub fn of(error: &sqlx::Error) -> Option<Self> {
        let code = error.as_database_error()?.code()?;
        Self::from_sqlstate(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_from_sqlstate() {
        assert_eq!(
            ConstraintViolation::from_sqlstate("23505"),
            Some(ConstraintViolation::Unique)
        );
        assert_eq!(
            ConstraintViolation::from_sqlstate("23503"),
            Some(ConstraintViolation::ForeignKey)
        );
        assert_eq!(ConstraintViolation::from_sqlstate("23514"), None);
        assert_eq!(ConstraintViolation::of(&sqlx::Error::RowNotFound), None);
    }
}
