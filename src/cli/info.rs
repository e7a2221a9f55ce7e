use serde::Serialize;

use crate::store::Store;
use crate::types::LifecycleStatus;

use super::display::format_bytes;
use super::init_store;

#[derive(Serialize)]
struct ServerInfo {
    tenants: usize,
    tokens: usize,
    admin_tokens: usize,
    projects: usize,
    active_projects: usize,
    storage_bytes: i64,
}

#[derive(Serialize)]
struct ProjectOutput {
    slug: String,
    display_name: String,
    status: LifecycleStatus,
    content_version: String,
    content_size_bytes: i64,
    updated_at: String,
}

#[derive(Serialize)]
struct TenantOutput {
    id: String,
    name: String,
    projects: Vec<ProjectOutput>,
}

#[derive(Serialize)]
struct DetailedServerInfo {
    #[serde(flatten)]
    summary: ServerInfo,
    tenants_detail: Vec<TenantOutput>,
}

pub fn run_info(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let tenants = store.list_tenants()?;
    let tokens = store.list_tokens("", 10000)?;

    let mut tenant_outputs = Vec::with_capacity(tenants.len());
    for tenant in &tenants {
        let projects = store
            .list_projects(&tenant.id)?
            .into_iter()
            .map(|p| ProjectOutput {
                slug: p.slug,
                display_name: p.display_name,
                status: p.status,
                content_version: p.content_version,
                content_size_bytes: p.content_size_bytes,
                updated_at: p.updated_at.to_rfc3339(),
            })
            .collect();
        tenant_outputs.push(TenantOutput {
            id: tenant.id.clone(),
            name: tenant.name.clone(),
            projects,
        });
    }

    let all_projects = || tenant_outputs.iter().flat_map(|t| t.projects.iter());
    let summary = ServerInfo {
        tenants: tenants.len(),
        tokens: tokens.len(),
        admin_tokens: tokens.iter().filter(|t| t.is_admin).count(),
        projects: all_projects().count(),
        active_projects: all_projects()
            .filter(|p| p.status == LifecycleStatus::Active)
            .count(),
        storage_bytes: all_projects().map(|p| p.content_size_bytes).sum(),
    };

    if json {
        let info = DetailedServerInfo {
            summary,
            tenants_detail: tenant_outputs,
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!();
        println!("Spadock Server Status");
        println!("{}", "─".repeat(21));
        println!("Tenants:   {}", summary.tenants);
        println!(
            "Tokens:    {} ({} admin)",
            summary.tokens, summary.admin_tokens
        );
        println!(
            "Projects:  {} ({} active)",
            summary.projects, summary.active_projects
        );
        println!("Storage:   {}", format_bytes(summary.storage_bytes));
        println!();
    }

    Ok(())
}
