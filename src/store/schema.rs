pub const SCHEMA: &str = r#"
-- Tenants partition projects and storage
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Tokens are auth credentials; non-admin tokens are bound to one tenant
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- 8-char lookup segment of the token
    is_admin INTEGER NOT NULL DEFAULT 0,

    -- Tenant binding (required for non-admin tokens, NULL only for admin tokens)
    tenant_id TEXT REFERENCES tenants(id) ON DELETE CASCADE,

    -- Lifecycle
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,            -- NULL = never
    last_used_at TEXT
);

-- Project registry. (tenant_id, slug) uniqueness is what serializes
-- concurrent uploads of the same slug.
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    slug TEXT NOT NULL,
    display_name TEXT NOT NULL,
    description TEXT,
    storage_path TEXT NOT NULL,
    content_size_bytes INTEGER NOT NULL DEFAULT 0,
    content_version TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive', 'error')),
    settings TEXT NOT NULL DEFAULT '{}',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),

    UNIQUE(tenant_id, slug)
);

-- Asset catalog, replaced as a whole on every (re)upload
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    relative_path TEXT NOT NULL,
    asset_type TEXT NOT NULL CHECK (asset_type IN ('css', 'js', 'html', 'other')),
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    declared_dependencies TEXT NOT NULL DEFAULT '[]',  -- JSON array of relative paths
    load_order INTEGER NOT NULL,
    is_critical INTEGER NOT NULL DEFAULT 0,

    UNIQUE(project_id, relative_path)
);

-- Chunked uploads in progress; chunk bytes live on disk
CREATE TABLE IF NOT EXISTS upload_sessions (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    slug TEXT NOT NULL,
    filename TEXT NOT NULL,
    total_chunks INTEGER NOT NULL,
    display_name TEXT,
    description TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Create indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_tenant ON tokens(tenant_id);
CREATE INDEX IF NOT EXISTS idx_projects_tenant ON projects(tenant_id);
CREATE INDEX IF NOT EXISTS idx_assets_project_order ON assets(project_id, is_critical, load_order);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_created ON upload_sessions(created_at);
"#;
