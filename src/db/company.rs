//! Company and instance repository
//!
//! An instance is one connected WhatsApp line. Its provider-side name is
//! globally unique and is how inbound webhooks find their company.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{DbPool, format_datetime, parse_datetime};
use crate::gateway::ResolvedInstance;
use crate::{Error, Result};

/// A tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A connected WhatsApp line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Company and instance repository
#[derive(Debug, Clone)]
pub struct CompanyRepo {
    pool: DbPool,
}

impl CompanyRepo {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a company
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create_company(&self, name: &str) -> Result<Company> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let company = Company {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO companies (id, name, created_at) VALUES (?1, ?2, ?3)",
            [&company.id, &company.name, &format_datetime(&company.created_at)],
        )?;

        Ok(company)
    }

    /// List all companies, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM companies ORDER BY created_at, name")?;

        let companies = stmt
            .query_map([], |row| {
                Ok(Company {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(companies)
    }

    /// Register an instance for a company
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the company does not exist, or a
    /// database error if the name is already taken
    pub fn create_instance(&self, company_id: &str, name: &str) -> Result<Instance> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let exists = conn
            .query_row("SELECT 1 FROM companies WHERE id = ?1", [company_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(Error::NotFound(format!("company {company_id}")));
        }

        let instance = Instance {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            name: name.trim().to_string(),
            status: "connected".to_string(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO instances (id, company_id, name, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            [
                &instance.id,
                &instance.company_id,
                &instance.name,
                &instance.status,
                &format_datetime(&instance.created_at),
            ],
        )
        .map_err(|e| Error::Database(format!("instance {}: {e}", instance.name)))?;

        Ok(instance)
    }

    /// List instances, optionally for one company
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_instances(&self, company_id: Option<&str>) -> Result<Vec<Instance>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, company_id, name, status, created_at FROM instances
             WHERE ?1 IS NULL OR company_id = ?1
             ORDER BY created_at, name",
        )?;

        let instances = stmt
            .query_map([company_id], |row| {
                Ok(Instance {
                    id: row.get(0)?,
                    company_id: row.get(1)?,
                    name: row.get(2)?,
                    status: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(instances)
    }

    /// Resolve an instance name to its company
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn resolve(&self, instance_name: &str) -> Result<Option<ResolvedInstance>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let resolved = conn
            .query_row(
                "SELECT i.id, c.id, c.name FROM instances i
                 JOIN companies c ON c.id = i.company_id
                 WHERE i.name = ?1",
                [instance_name],
                |row| {
                    Ok(ResolvedInstance {
                        instance_id: row.get(0)?,
                        company_id: row.get(1)?,
                        company_name: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn test_resolve_instance() {
        let repo = CompanyRepo::new(init_memory().unwrap());
        let company = repo.create_company("Acme").unwrap();
        let instance = repo.create_instance(&company.id, "acme-main").unwrap();

        let resolved = repo.resolve("acme-main").unwrap().unwrap();
        assert_eq!(resolved.instance_id, instance.id);
        assert_eq!(resolved.company_id, company.id);
        assert_eq!(resolved.company_name, "Acme");

        assert!(repo.resolve("missing").unwrap().is_none());
    }

    #[test]
    fn test_instance_names_are_unique() {
        let repo = CompanyRepo::new(init_memory().unwrap());
        let a = repo.create_company("A").unwrap();
        let b = repo.create_company("B").unwrap();

        repo.create_instance(&a.id, "shared").unwrap();
        assert!(repo.create_instance(&b.id, "shared").is_err());
    }

    #[test]
    fn test_instance_requires_company() {
        let repo = CompanyRepo::new(init_memory().unwrap());
        let err = repo.create_instance("nope", "line").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_list_instances_by_company() {
        let repo = CompanyRepo::new(init_memory().unwrap());
        let a = repo.create_company("A").unwrap();
        let b = repo.create_company("B").unwrap();
        repo.create_instance(&a.id, "a-1").unwrap();
        repo.create_instance(&b.id, "b-1").unwrap();

        assert_eq!(repo.list_instances(None).unwrap().len(), 2);
        let only_a = repo.list_instances(Some(&a.id)).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].name, "a-1");
        assert_eq!(repo.list_companies().unwrap().len(), 2);
    }
}
