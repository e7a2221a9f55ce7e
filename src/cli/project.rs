use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::commands::RemoteArgs;
use super::confirm_action;
use super::display::{format_bytes, format_relative_time};
use super::http_client::{ApiClient, upload_form};
use crate::types::{AssetRecord, Project};

const MIB: u64 = 1024 * 1024;

#[derive(Deserialize)]
struct UploadSummary {
    project: Project,
    assets: Vec<AssetRecord>,
    created: bool,
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    slug: &'a str,
    filename: &'a str,
    total_chunks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Deserialize)]
struct DeleteSummary {
    #[serde(default)]
    backup_path: Option<String>,
}

pub fn run_project_upload(
    remote: &RemoteArgs,
    archive: &Path,
    slug: &str,
    display_name: Option<&str>,
    description: Option<&str>,
    chunk_mib: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    if !archive.is_file() {
        anyhow::bail!("Archive not found: {}", archive.display());
    }
    let client = ApiClient::new(remote)?;

    let response: Value = match chunk_mib {
        Some(0) => anyhow::bail!("--chunk-mib must be positive"),
        Some(mib) => upload_chunked(&client, archive, slug, display_name, description, mib * MIB)?,
        None => client.post_multipart(
            "/projects",
            upload_form(archive, slug, display_name, description)?,
        )?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let summary: UploadSummary = serde_json::from_value(response)?;
    let project = &summary.project;
    println!();
    println!(
        "{} '{}' ({} files, {})",
        if summary.created { "Registered" } else { "Updated" },
        project.slug,
        summary.assets.len(),
        format_bytes(project.content_size_bytes)
    );
    println!("  version {}", project.content_version);
    println!(
        "  embed at {}/render/<tenant>/{}",
        client.base_url(),
        project.slug
    );
    println!();

    Ok(())
}

fn upload_chunked(
    client: &ApiClient,
    archive: &Path,
    slug: &str,
    display_name: Option<&str>,
    description: Option<&str>,
    chunk_size: u64,
) -> anyhow::Result<Value> {
    let size = archive.metadata()?.len();
    let total_chunks = u32::try_from(size.div_ceil(chunk_size).max(1))
        .map_err(|_| anyhow::anyhow!("Archive needs too many chunks, raise --chunk-mib"))?;
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.zip");

    let session: SessionCreated = client.post(
        "/uploads",
        &CreateSessionBody {
            slug,
            filename,
            total_chunks,
            display_name,
            description,
        },
    )?;

    let result = send_chunks(client, &session.id, archive, chunk_size, total_chunks)
        .and_then(|()| client.post_empty(&format!("/uploads/{}/finalize", session.id)));
    if result.is_err() {
        // Finalize discards the session itself; this covers a failed chunk.
        let _ = client.delete_quiet(&format!("/uploads/{}", session.id));
    }
    result
}

fn send_chunks(
    client: &ApiClient,
    session_id: &str,
    archive: &Path,
    chunk_size: u64,
    total_chunks: u32,
) -> anyhow::Result<()> {
    let mut file = File::open(archive)?;
    for index in 0..total_chunks {
        let mut buf = Vec::with_capacity(chunk_size as usize);
        (&mut file).take(chunk_size).read_to_end(&mut buf)?;
        client.put_bytes(&format!("/uploads/{session_id}/chunks/{index}"), buf)?;
        eprintln!("  chunk {}/{total_chunks} sent", index + 1);
    }
    Ok(())
}

pub fn run_project_list(remote: &RemoteArgs, json: bool) -> anyhow::Result<()> {
    let client = ApiClient::new(remote)?;
    let projects: Vec<Project> = client.get("/projects")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
    } else if projects.is_empty() {
        println!("No projects found.");
    } else {
        println!();
        for project in &projects {
            println!(
                "  {:<24} {:<8} {:>10}  v{}  updated {}",
                project.slug,
                project.status.as_str(),
                format_bytes(project.content_size_bytes),
                project.content_version,
                format_relative_time(&project.updated_at)
            );
        }
        println!();
    }

    Ok(())
}

pub fn run_project_status(remote: &RemoteArgs, slug: &str, inactive: bool) -> anyhow::Result<()> {
    let client = ApiClient::new(remote)?;
    let action = if inactive { "deactivate" } else { "activate" };
    let project: Project = client.post_empty(&format!("/projects/{slug}/{action}"))?;

    println!("Project '{}' is now {}.", project.slug, project.status);
    Ok(())
}

pub fn run_project_delete(remote: &RemoteArgs, slug: &str, yes: bool) -> anyhow::Result<()> {
    let client = ApiClient::new(remote)?;

    let confirmed = confirm_action(
        &format!("Delete project '{slug}' and its files?"),
        yes,
    )?;
    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    let summary: DeleteSummary = client.delete(&format!("/projects/{slug}"))?;

    println!();
    println!("Project '{slug}' deleted.");
    if let Some(path) = summary.backup_path {
        println!("  Backup kept at {path}");
    }
    println!();

    Ok(())
}
