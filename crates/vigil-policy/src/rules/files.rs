//! Rules that look only at the path and file metadata.

use vigil_types::{ActionEvent, RiskLevel, RuleResult};

use crate::pattern::{NameSet, PathInfo};
use crate::rule::{ClassifyContext, RiskRule};

const ENV_FILES: &[&str] = &[".env", ".env.*", "*.env"];
const ENV_TEMPLATES: &[&str] = &["*.example", "*.sample", "*.template", "*.dist"];

const MANIFESTS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.toml",
    "cargo.lock",
    "go.mod",
    "go.sum",
    "requirements*.txt",
    "pipfile",
    "pipfile.lock",
    "pyproject.toml",
    "poetry.lock",
    "gemfile",
    "gemfile.lock",
    "composer.json",
    "composer.lock",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
];

const CI_FILES: &[&str] = &[
    ".gitlab-ci.yml",
    "jenkinsfile",
    "azure-pipelines.yml",
    ".travis.yml",
    "bitbucket-pipelines.yml",
];
const CI_DIRS: &[&str] = &[".circleci", ".buildkite"];

const OTHER_CONFIG: &[&str] = &[
    "tsconfig*.json",
    ".eslintrc*",
    "eslint.config.*",
    ".prettierrc*",
    ".babelrc",
    "*.config.js",
    "*.config.mjs",
    "*.config.cjs",
    "*.config.ts",
    "dockerfile",
    "docker-compose*.yml",
    "docker-compose*.yaml",
    ".gitignore",
    ".npmrc",
    ".editorconfig",
    "makefile",
    "*.toml",
    "*.ini",
    "*.cfg",
    "*.conf",
    "*.yaml",
    "*.yml",
];

/// Environment files, dependency manifests, CI pipelines, and general config.
pub struct ConfigFileRule {
    env: NameSet,
    env_templates: NameSet,
    manifests: NameSet,
    ci: NameSet,
    other: NameSet,
}

impl ConfigFileRule {
    pub fn new() -> Self {
        Self {
            env: NameSet::new(ENV_FILES),
            env_templates: NameSet::new(ENV_TEMPLATES),
            manifests: NameSet::new(MANIFESTS),
            ci: NameSet::new(CI_FILES),
            other: NameSet::new(OTHER_CONFIG),
        }
    }
}

impl Default for ConfigFileRule {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRule for ConfigFileRule {
    fn name(&self) -> &'static str {
        "config-file"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let info = PathInfo::of(event);
        let (level, what) = if self.env.contains(&info.name) {
            if self.env_templates.contains(&info.name) {
                (RiskLevel::Low, "environment template")
            } else {
                (RiskLevel::Critical, "secret-bearing environment file")
            }
        } else if info.under(&[".github", "workflows"])
            || info.in_dir(CI_DIRS)
            || self.ci.contains(&info.name)
        {
            (RiskLevel::High, "CI/workflow configuration")
        } else if self.manifests.contains(&info.name) {
            (RiskLevel::Medium, "dependency manifest")
        } else if self.other.contains(&info.name) {
            (RiskLevel::Low, "configuration file")
        } else {
            return None;
        };
        Some(RuleResult::new(
            self.name(),
            level,
            format!("{what} {} changed", event.file_path),
        ))
    }
}

const ORM_SCHEMAS: &[&str] = &[
    "*.prisma",
    "schema.rb",
    "structure.sql",
    "schema.sql",
    "*.dbml",
    "schema.graphql.sql",
];
const MIGRATION_DIRS: &[&str] = &["migrations", "migration", "migrate", "alembic", "flyway"];

/// ORM schema definitions and database migrations.
pub struct SchemaMigrationRule {
    schemas: NameSet,
}

impl SchemaMigrationRule {
    pub fn new() -> Self {
        Self {
            schemas: NameSet::new(ORM_SCHEMAS),
        }
    }
}

impl Default for SchemaMigrationRule {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRule for SchemaMigrationRule {
    fn name(&self) -> &'static str {
        "schema-migration"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let info = PathInfo::of(event);
        if self.schemas.contains(&info.name) {
            return Some(RuleResult::new(
                self.name(),
                RiskLevel::Critical,
                format!("database schema {} changed", event.file_path),
            ));
        }
        if info.in_dir(MIGRATION_DIRS) {
            return Some(RuleResult::new(
                self.name(),
                RiskLevel::High,
                format!("migration {} changed", event.file_path),
            ));
        }
        None
    }
}

const KEY_MATERIAL: &[&str] = &[
    "id_rsa*",
    "id_dsa*",
    "id_ecdsa*",
    "id_ed25519*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.jks",
    "*.keystore",
    "*.kdbx",
    ".htpasswd",
    ".netrc",
    ".pgpass",
    "credentials",
    "credentials.json",
    "service-account*.json",
];
const KEY_DIRS: &[&str] = &[".ssh", ".gnupg", ".aws"];
const SECRET_WORDS: &[&str] = &[
    "secret",
    "token",
    "credential",
    "password",
    "passwd",
    "apikey",
    "api_key",
    "api-key",
    "private_key",
    "private-key",
];

/// Key material and files whose names suggest secrets.
pub struct SecurityFileRule {
    keys: NameSet,
}

impl SecurityFileRule {
    pub fn new() -> Self {
        Self {
            keys: NameSet::new(KEY_MATERIAL),
        }
    }
}

impl Default for SecurityFileRule {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRule for SecurityFileRule {
    fn name(&self) -> &'static str {
        "security-file"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let info = PathInfo::of(event);
        if let Some(pattern) = self.keys.matching(&info.name) {
            return Some(RuleResult::new(
                self.name(),
                RiskLevel::Critical,
                format!("{} matches key material pattern {pattern}", event.file_path),
            ));
        }
        if info.in_dir(KEY_DIRS) {
            return Some(RuleResult::new(
                self.name(),
                RiskLevel::Critical,
                format!("{} is inside a credential directory", event.file_path),
            ));
        }
        if let Some(word) = SECRET_WORDS.iter().find(|w| info.name.contains(*w)) {
            return Some(RuleResult::new(
                self.name(),
                RiskLevel::High,
                format!("{} looks security-sensitive ({word})", event.file_path),
            ));
        }
        None
    }
}

const API_DIRS: &[&str] = &[
    "routes",
    "api",
    "controllers",
    "middleware",
    "middlewares",
    "handlers",
    "endpoints",
];
const API_FILES: &[&str] = &[
    "*.routes.*",
    "routes.*",
    "router.*",
    "middleware.*",
    "openapi.*",
    "swagger.*",
    "*.proto",
    "*.graphql",
    "urls.py",
];

/// Route, middleware and interface-definition files.
pub struct ApiContractRule {
    files: NameSet,
}

impl ApiContractRule {
    pub fn new() -> Self {
        Self {
            files: NameSet::new(API_FILES),
        }
    }
}

impl Default for ApiContractRule {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRule for ApiContractRule {
    fn name(&self) -> &'static str {
        "api-contract"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let info = PathInfo::of(event);
        if self.files.contains(&info.name) || info.in_dir(API_DIRS) {
            Some(RuleResult::new(
                self.name(),
                RiskLevel::Medium,
                format!("API surface {} changed", event.file_path),
            ))
        } else {
            None
        }
    }
}

const TEST_FILES: &[&str] = &[
    "*.test.*",
    "*.spec.*",
    "test_*.py",
    "*_test.py",
    "*_test.go",
    "*_test.rs",
    "*_spec.rb",
    "*test.java",
    "*tests.cs",
];
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "__mocks__"];

/// Test code. Votes LOW alongside whatever else the path triggers.
pub struct TestFileRule {
    files: NameSet,
}

impl TestFileRule {
    pub fn new() -> Self {
        Self {
            files: NameSet::new(TEST_FILES),
        }
    }
}

impl Default for TestFileRule {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRule for TestFileRule {
    fn name(&self) -> &'static str {
        "test-file"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let info = PathInfo::of(event);
        if self.files.contains(&info.name) || info.in_dir(TEST_DIRS) {
            Some(RuleResult::new(
                self.name(),
                RiskLevel::Low,
                format!("test file {} changed", event.file_path),
            ))
        } else {
            None
        }
    }
}

const EXECUTABLE_EXTS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "com", "msi", "elf", "out", "app", "jar", "war", "class",
    "wasm", "o", "a", "apk", "dmg", "deb", "rpm", "sh", "bash", "bat", "cmd", "ps1",
];
const MEDIA_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "tiff", "mp3", "wav", "ogg", "flac", "mp4",
    "mov", "avi", "webm", "mkv", "ttf", "otf", "woff", "woff2", "pdf",
];
const OTHER_BINARY_EXTS: &[&str] = &[
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "sqlite", "sqlite3", "db", "pyc", "pdb",
    "node", "dat",
];
/// Script extensions only count as executable when the producer says the
/// content is binary.
const SCRIPT_EXTS: &[&str] = &["sh", "bash", "bat", "cmd", "ps1"];

/// Binary content written into the tree.
pub struct BinaryFileRule;

impl RiskRule for BinaryFileRule {
    fn name(&self) -> &'static str {
        "binary-file"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        if !event.operation.writes_content() {
            return None;
        }
        let info = PathInfo::of(event);
        let known_binary = !info.extension_in(SCRIPT_EXTS)
            && (info.extension_in(EXECUTABLE_EXTS)
                || info.extension_in(MEDIA_EXTS)
                || info.extension_in(OTHER_BINARY_EXTS));
        if !event.is_binary.unwrap_or(known_binary) {
            return None;
        }

        let (level, what) = if info.extension_in(EXECUTABLE_EXTS) {
            (RiskLevel::Critical, "executable binary")
        } else if info.extension_in(MEDIA_EXTS) {
            (RiskLevel::Low, "media file")
        } else {
            (RiskLevel::Medium, "binary file")
        };
        Some(RuleResult::new(
            self.name(),
            level,
            format!("{what} {} written", event.file_path),
        ))
    }
}

const OS_ROOTS: &[&str] = &[
    "/etc",
    "/usr",
    "/bin",
    "/sbin",
    "/boot",
    "/lib",
    "/lib64",
    "/var/lib",
    "/system",
    "/library",
    "/private/etc",
    "c:/windows",
    "c:/program files",
];
const OWN_FILES: &[&str] = &["vigil.db", "vigil.db-wal", "vigil.db-shm", "vigil.toml"];
const OWN_DIRS: &[&str] = &[".vigil"];

/// The control plane's own files and OS-critical directories.
///
/// Applies whether or not any zone is configured, and always blocks.
pub struct SelfProtectionRule {
    roots: Vec<String>,
}

impl SelfProtectionRule {
    /// `extra_roots` are additional absolute prefixes (install and ledger
    /// directories).
    pub fn new(extra_roots: &[String]) -> Self {
        let roots = OS_ROOTS
            .iter()
            .map(|r| r.to_string())
            .chain(
                extra_roots
                    .iter()
                    .map(|r| r.replace('\\', "/").trim_end_matches('/').to_ascii_lowercase())
                    .filter(|r| !r.is_empty()),
            )
            .collect();
        Self { roots }
    }
}

impl RiskRule for SelfProtectionRule {
    fn name(&self) -> &'static str {
        "self-protection"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let info = PathInfo::of(event);
        let root = self
            .roots
            .iter()
            .find(|root| info.path == **root || info.path.starts_with(&format!("{root}/")));
        let reason = if let Some(root) = root {
            format!("{} is under protected system path {root}", event.file_path)
        } else if OWN_FILES.contains(&info.name.as_str()) || info.in_dir(OWN_DIRS) {
            format!("{} belongs to the control plane itself", event.file_path)
        } else {
            return None;
        };
        Some(RuleResult::new(self.name(), RiskLevel::Critical, reason).blocking())
    }
}
