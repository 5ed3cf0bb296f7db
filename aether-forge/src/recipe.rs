//! Build recipes
//!
//! Generates the Dockerfile written into a checkout before building it.

use std::path::{Path, PathBuf};

use crate::service::detector::{PackageManager, ProjectKind};

/// File name of the generated build descriptor
pub const DOCKERFILE_NAME: &str = "Dockerfile.aether";

/// Port the app listens on inside its container
pub const APP_PORT: u16 = 3000;

/// Dockerfile contents for a detected project
pub fn dockerfile(kind: &ProjectKind) -> String {
    match kind {
        ProjectKind::NextJs { package_manager } => next_dockerfile(*package_manager),
    }
}

fn next_dockerfile(package_manager: PackageManager) -> String {
    let (setup, copy, install, build, start) = match package_manager {
        PackageManager::Pnpm => (
            "RUN npm install -g pnpm\n",
            "COPY package.json pnpm-lock.yaml* ./",
            "RUN pnpm install --frozen-lockfile",
            "RUN pnpm build",
            r#"CMD ["pnpm", "start"]"#,
        ),
        PackageManager::Yarn => (
            "RUN corepack enable\n",
            "COPY package.json yarn.lock* ./",
            "RUN yarn install --frozen-lockfile",
            "RUN yarn build",
            r#"CMD ["yarn", "start"]"#,
        ),
        PackageManager::Npm => (
            "",
            "COPY package.json package-lock.json* ./",
            "RUN if [ -f package-lock.json ]; then npm ci; else npm install; fi",
            "RUN npm run build",
            r#"CMD ["npm", "start"]"#,
        ),
    };

    format!(
        "FROM node:22-alpine\n\
         \n\
         WORKDIR /app\n\
         \n\
         {setup}\
         {copy}\n\
         {install}\n\
         \n\
         COPY . .\n\
         {build}\n\
         \n\
         ENV PORT={port}\n\
         EXPOSE {port}\n\
         \n\
         {start}\n",
        port = APP_PORT,
    )
}

/// Writes the Dockerfile for `kind` into `source_dir` and returns its path
pub async fn write_dockerfile(source_dir: &Path, kind: &ProjectKind) -> std::io::Result<PathBuf> {
    let path = source_dir.join(DOCKERFILE_NAME);
    tokio::fs::write(&path, dockerfile(kind)).await?;
    Ok(path)
}
