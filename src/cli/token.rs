use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::TokenGenerator;
use crate::error::Error;
use crate::store::Store;
use crate::types::Token;

use super::display::format_relative_time;
use super::{confirm_action, init_store};

const MAX_LOOKUP_ATTEMPTS: usize = 3;

#[derive(Serialize)]
struct TokenOutput {
    id: String,
    lookup: String,
    tenant: Option<String>,
    is_admin: bool,
    created_at: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
}

/// Builds a token record and its raw value. `tenant_id == None` makes an admin token.
pub fn create_token(
    generator: &TokenGenerator,
    tenant_id: Option<String>,
    expires_in: Option<Duration>,
) -> anyhow::Result<(Token, String)> {
    let (raw_token, lookup, hash) = generator.generate()?;
    let now = Utc::now();
    let token = Token {
        id: Uuid::new_v4().to_string(),
        token_hash: hash,
        token_lookup: lookup,
        is_admin: tenant_id.is_none(),
        tenant_id,
        created_at: now,
        expires_at: expires_in.map(|d| now + d),
        last_used_at: None,
    };
    Ok((token, raw_token))
}

/// Creates and stores a token, regenerating on the rare lookup collision.
pub(super) fn issue_token(
    store: &dyn Store,
    tenant_id: Option<String>,
    expires_in: Option<Duration>,
) -> anyhow::Result<(Token, String)> {
    let generator = TokenGenerator::new();
    for _ in 0..MAX_LOOKUP_ATTEMPTS {
        let (token, raw_token) = create_token(&generator, tenant_id.clone(), expires_in)?;
        match store.create_token(&token) {
            Ok(()) => return Ok((token, raw_token)),
            Err(Error::TokenLookupCollision) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    anyhow::bail!("Failed to generate a unique token, try again")
}

fn tenant_names(store: &dyn Store) -> anyhow::Result<HashMap<String, String>> {
    Ok(store
        .list_tenants()?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect())
}

pub fn run_token_create(
    data_dir: String,
    tenant: Option<String>,
    expires_days: Option<i64>,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let tenant_id = match &tenant {
        Some(name) => Some(
            store
                .get_tenant_by_name(name)?
                .ok_or_else(|| anyhow::anyhow!("Tenant not found: {name}"))?
                .id,
        ),
        None => None,
    };
    let expires_in = expires_days.filter(|d| *d > 0).map(Duration::days);

    let (_, raw_token) = issue_token(&store, tenant_id, expires_in)?;

    println!();
    match &tenant {
        Some(name) => println!("Token created for tenant '{name}': {raw_token}"),
        None => println!("Admin token created: {raw_token}"),
    }
    println!("  Save this now - it cannot be retrieved later.");
    println!();

    Ok(())
}

pub fn run_token_list(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    let tokens = store.list_tokens("", 10000)?;
    let names = tenant_names(&store)?;

    if json {
        let output: Vec<TokenOutput> = tokens
            .iter()
            .map(|token| TokenOutput {
                id: token.id.clone(),
                lookup: token.token_lookup.clone(),
                tenant: token
                    .tenant_id
                    .as_ref()
                    .and_then(|id| names.get(id).cloned()),
                is_admin: token.is_admin,
                created_at: token.created_at.to_rfc3339(),
                expires_at: token.expires_at.map(|dt| dt.to_rfc3339()),
                last_used_at: token.last_used_at.map(|dt| dt.to_rfc3339()),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if tokens.is_empty() {
        println!("No tokens found.");
        return Ok(());
    }
    println!();
    for token in &tokens {
        let scope = match &token.tenant_id {
            Some(id) => names.get(id).map_or("<unknown>", String::as_str),
            None => "admin",
        };
        let last_used = token
            .last_used_at
            .as_ref()
            .map_or_else(|| "never used".to_string(), format_relative_time);
        println!(
            "  spadock_{}...  {}  {}  created {}  {}",
            token.token_lookup,
            token.id,
            scope,
            format_relative_time(&token.created_at),
            last_used
        );
    }
    println!();

    Ok(())
}

pub fn run_token_revoke(data_dir: String, token_id: String, yes: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    let token = store
        .get_token_by_id(&token_id)?
        .ok_or_else(|| anyhow::anyhow!("Token not found: {token_id}"))?;

    if token.is_admin {
        let other_admins = store
            .list_tokens("", 10000)?
            .iter()
            .filter(|t| t.is_admin && t.id != token.id)
            .count();
        if other_admins == 0 {
            anyhow::bail!("Refusing to revoke the last admin token");
        }
    }

    let confirmed = confirm_action(
        &format!("Revoke token spadock_{}...?", token.token_lookup),
        yes,
    )?;
    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    store.delete_token(&token.id)?;

    println!();
    println!("Token revoked.");
    println!();

    Ok(())
}
