//! Database dispatch macros for reducing code duplication.
//!
//! The pool, pooled connection and transaction wrappers are all enums with one
//! variant per backend. Each backend has an executor submodule with the same
//! function names, so a single body can be written once and expanded for
//! every variant with the right submodule in scope as `backend`.

/// Generate one match arm per backend variant of a dispatch enum.
///
/// Inside `$body`, `$p` is bound to the variant's payload and `backend`
/// names the matching `crate::db::executor` submodule.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, self, p => backend::fetch_all(p, stmt, columns).await)
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, $p:ident => $body:expr) => {
        match $value {
            $enum::MySql($p) => {
                #[allow(unused_imports)]
                use $crate::db::executor::mysql as backend;
                $body
            }
            $enum::Postgres($p) => {
                #[allow(unused_imports)]
                use $crate::db::executor::postgres as backend;
                $body
            }
            $enum::SQLite($p) => {
                #[allow(unused_imports)]
                use $crate::db::executor::sqlite as backend;
                $body
            }
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    #[derive(Debug)]
    enum Probe {
        MySql(u8),
        Postgres(u8),
        SQLite(u8),
    }

    fn label(probe: &Probe) -> String {
        impl_db_dispatch!(Probe, probe, v => format!("{}:{}", backend::NAME, v))
    }

    #[test]
    fn test_dispatch_selects_backend_module() {
        assert_eq!(label(&Probe::MySql(1)), "mysql:1");
        assert_eq!(label(&Probe::Postgres(2)), "postgres:2");
        assert_eq!(label(&Probe::SQLite(3)), "sqlite:3");
    }
}
