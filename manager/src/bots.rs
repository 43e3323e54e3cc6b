//! Bot project directories: scaffolding, listing and file access.
//!
//! Every operation takes the raw bot name as received and resolves it
//! through the [`Sandbox`] before touching the filesystem.

use std::path::Path;

use serde_json::{json, Value};
use tracing::info;

use crate::errors::ManagerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::sandbox::{BotIdentity, Sandbox};

pub const ENTRY_FILE: &str = "index.js";
pub const MANIFEST_FILE: &str = "package.json";
pub const BUILD_FILE: &str = "Dockerfile";

/// Directories never listed or digested
pub const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

const DOCKERFILE: &str = "FROM node:18-slim
WORKDIR /app
COPY package*.json ./
RUN npm install
COPY . .
CMD [\"npm\", \"start\"]
";

fn entry_stub(identity: &BotIdentity) -> String {
    format!(
        "// {identity} bot\n\
         const TelegramBot = require('node-telegram-bot-api');\n\
         \n\
         const bot = new TelegramBot(process.env.TELEGRAM_BOT_TOKEN, {{ polling: true }});\n\
         \n\
         bot.onText(/\\/start/, (msg) => {{\n  \
           bot.sendMessage(msg.chat.id, 'Hello from {identity}!');\n\
         }});\n\
         \n\
         console.log('Bot is running...');\n"
    )
}

/// Manifest written for new bots
pub fn default_manifest(identity: &BotIdentity) -> Value {
    json!({
        "name": identity.as_str().to_lowercase(),
        "version": "1.0.0",
        "main": ENTRY_FILE,
        "scripts": {
            "start": format!("node {ENTRY_FILE}")
        },
        "dependencies": {
            "node-telegram-bot-api": "^0.61.0"
        }
    })
}

/// Bot project directories under the sandbox root
#[derive(Debug, Clone)]
pub struct BotWorkspace {
    sandbox: Sandbox,
}

impl BotWorkspace {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    async fn existing_dir(&self, identity: &BotIdentity) -> Result<Dir, ManagerError> {
        let dir = Dir::new(self.sandbox.resolve_bot_dir(identity).await?);
        if !dir.exists().await {
            return Err(ManagerError::NotFound(format!("bot {identity}")));
        }
        Ok(dir)
    }

    /// Create a new bot with entry file, manifest and build descriptor
    pub async fn create(&self, raw_name: &str) -> Result<BotIdentity, ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        let dir = Dir::new(self.sandbox.resolve_bot_dir(&identity).await?);
        if dir.exists().await {
            return Err(ManagerError::AlreadyExists(format!("bot {identity}")));
        }

        dir.create().await?;
        File::new(dir.path().join(ENTRY_FILE))
            .create_new(entry_stub(&identity).as_bytes())
            .await?;
        scaffold(dir.path(), &identity).await?;

        info!(bot = %identity, "Created bot");
        Ok(identity)
    }

    /// Store an uploaded entry file as a bot named after the file stem,
    /// adding manifest and build descriptor when missing
    pub async fn upload(&self, file_name: &str, contents: &[u8]) -> Result<BotIdentity, ManagerError> {
        let stem = Path::new(file_name)
            .file_name()
            .map(Path::new)
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let identity = BotIdentity::parse(&stem)?;

        let dir = Dir::new(self.sandbox.resolve_bot_dir(&identity).await?);
        dir.create().await?;
        File::new(dir.path().join(ENTRY_FILE)).write_bytes(contents).await?;
        scaffold(dir.path(), &identity).await?;

        info!(bot = %identity, bytes = contents.len(), "Uploaded bot");
        Ok(identity)
    }

    /// Every bot directory whose name is a valid identity
    pub async fn list(&self) -> Result<Vec<BotIdentity>, ManagerError> {
        let names = Dir::new(self.sandbox.root()).list_dir_names().await?;
        Ok(names
            .into_iter()
            .filter_map(|name| match BotIdentity::parse(&name) {
                Ok(identity) if identity.as_str() == name => Some(identity),
                _ => None,
            })
            .collect())
    }

    pub async fn list_files(&self, raw_name: &str) -> Result<Vec<String>, ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        self.existing_dir(&identity)
            .await?
            .list_files_recursive(SKIPPED_DIRS)
            .await
    }

    pub async fn read_file(&self, raw_name: &str, relative: &str) -> Result<Vec<u8>, ManagerError> {
        let file = self.file(raw_name, relative).await?;
        file.read_bytes().await
    }

    /// Write a file; with `create_only` an existing file is an error
    pub async fn write_file(
        &self,
        raw_name: &str,
        relative: &str,
        contents: &[u8],
        create_only: bool,
    ) -> Result<(), ManagerError> {
        let file = self.file(raw_name, relative).await?;
        if create_only {
            file.create_new(contents).await
        } else {
            file.write_bytes(contents).await
        }
    }

    pub async fn delete_file(&self, raw_name: &str, relative: &str) -> Result<(), ManagerError> {
        let file = self.file(raw_name, relative).await?;
        file.delete().await
    }

    /// The bot's manifest
    pub async fn get_config(&self, raw_name: &str) -> Result<Value, ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        let dir = self.existing_dir(&identity).await?;
        File::new(dir.path().join(MANIFEST_FILE)).read_json().await
    }

    /// Replace the bot's manifest; it must be a JSON object
    pub async fn put_config(&self, raw_name: &str, manifest: &Value) -> Result<(), ManagerError> {
        if !manifest.is_object() {
            return Err(ManagerError::ValidationError(
                "manifest must be a JSON object".to_string(),
            ));
        }
        let identity = BotIdentity::parse(raw_name)?;
        let dir = self.existing_dir(&identity).await?;
        File::new(dir.path().join(MANIFEST_FILE)).write_json(manifest).await
    }

    async fn file(&self, raw_name: &str, relative: &str) -> Result<File, ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        self.existing_dir(&identity).await?;
        let path = self.sandbox.resolve_file_path(&identity, relative).await?;
        Ok(File::new(path))
    }
}

/// Add manifest and build descriptor where missing
async fn scaffold(dir: &Path, identity: &BotIdentity) -> Result<(), ManagerError> {
    let manifest = File::new(dir.join(MANIFEST_FILE));
    if !manifest.exists().await {
        manifest.write_json(&default_manifest(identity)).await?;
    }

    let build = File::new(dir.join(BUILD_FILE));
    if !build.exists().await {
        build.write_bytes(DOCKERFILE.as_bytes()).await?;
    }
    Ok(())
}
