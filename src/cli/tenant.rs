use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;
use crate::store::Store;
use crate::types::Tenant;
use crate::validation::validate_tenant_name;

use super::init_store;
use super::token::issue_token;

#[derive(Serialize)]
struct TenantOutput {
    id: String,
    name: String,
    projects: i64,
    created_at: String,
}

pub fn run_tenant_add(data_dir: String, name: String, create_token: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    validate_tenant_name(&name).map_err(|e| anyhow::anyhow!(e))?;

    let tenant = Tenant {
        id: Uuid::new_v4().to_string(),
        name,
        created_at: Utc::now(),
    };
    match store.create_tenant(&tenant) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => anyhow::bail!("Tenant '{}' already exists", tenant.name),
        Err(e) => return Err(e.into()),
    }

    println!();
    println!("Tenant '{}' created ({})", tenant.name, tenant.id);

    if create_token {
        let (_, raw_token) = issue_token(&store, Some(tenant.id.clone()), None)?;
        println!();
        println!("Token: {raw_token}");
        println!("  Save this now - it cannot be retrieved later.");
    }
    println!();

    Ok(())
}

pub fn run_tenant_list(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let mut output = Vec::new();
    for tenant in store.list_tenants()? {
        output.push(TenantOutput {
            projects: store.count_projects(&tenant.id)?,
            id: tenant.id,
            name: tenant.name,
            created_at: tenant.created_at.to_rfc3339(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if output.is_empty() {
        println!("No tenants found.");
    } else {
        println!();
        for tenant in &output {
            println!("  {:<24} {} project(s)", tenant.name, tenant.projects);
        }
        println!();
    }

    Ok(())
}
