// Shallow clone/checkout mechanics for the repository fetcher (C4).
//
// Kept separate from `crate::repo_fetch` so the git2 plumbing can be
// unit-tested against plain local repositories without any token/HTTP
// concerns leaking in.

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Cred, FetchOptions, RemoteCallbacks, Repository,
};
use std::path::{Path, PathBuf};

use crate::error::KotaError;

/// Credentials for an authenticated clone. GitHub App installation tokens
/// are presented as the password half of a basic-auth pair; the username
/// is conventionally "x-access-token".
pub struct CloneAuth {
    pub username: String,
    pub token: String,
}

impl CloneAuth {
    pub fn installation_token(token: String) -> Self {
        Self {
            username: "x-access-token".to_string(),
            token,
        }
    }
}

/// Clone `git_url` into `dest` at shallow depth 1, then checkout `git_ref`
/// (branch, tag, or commit sha). If `dest` already contains a repository,
/// fetch and checkout in place instead of re-cloning.
pub fn clone_or_update(
    git_url: &str,
    git_ref: &str,
    dest: &Path,
    auth: Option<&CloneAuth>,
) -> Result<PathBuf, KotaError> {
    if dest.join(".git").exists() {
        return fetch_and_checkout(dest, git_ref, auth);
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.depth(1);
    if let Some(callbacks) = auth.map(credential_callbacks) {
        fetch_opts.remote_callbacks(callbacks);
    }

    let repo = RepoBuilder::new()
        .fetch_options(fetch_opts)
        .clone(git_url, dest)
        .map_err(classify_git_error)?;

    checkout_ref(&repo, git_ref)?;
    Ok(dest.to_path_buf())
}

fn fetch_and_checkout(
    dest: &Path,
    git_ref: &str,
    auth: Option<&CloneAuth>,
) -> Result<PathBuf, KotaError> {
    let repo = Repository::open(dest).map_err(classify_git_error)?;
    {
        let mut remote = repo.find_remote("origin").map_err(classify_git_error)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.depth(1);
        if let Some(callbacks) = auth.map(credential_callbacks) {
            fetch_opts.remote_callbacks(callbacks);
        }
        remote
            .fetch(&[git_ref], Some(&mut fetch_opts), None)
            .map_err(classify_git_error)?;
    }
    checkout_ref(&repo, git_ref)?;
    Ok(dest.to_path_buf())
}

fn checkout_ref(repo: &Repository, git_ref: &str) -> Result<(), KotaError> {
    let candidates = [
        format!("refs/remotes/origin/{git_ref}"),
        format!("refs/tags/{git_ref}"),
        git_ref.to_string(),
    ];

    let object = candidates
        .iter()
        .find_map(|c| repo.revparse_single(c).ok())
        .ok_or_else(|| KotaError::UpstreamNotFound(format!("ref not found: {git_ref}")))?;

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_tree(&object, Some(&mut checkout))
        .map_err(classify_git_error)?;
    repo.set_head_detached(object.id()).map_err(classify_git_error)?;
    Ok(())
}

fn credential_callbacks(auth: &CloneAuth) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext(&auth.username, &auth.token)
    });
    callbacks
}

fn classify_git_error(err: git2::Error) -> KotaError {
    use git2::ErrorCode;
    match err.code() {
        ErrorCode::NotFound => KotaError::UpstreamNotFound(err.message().to_string()),
        ErrorCode::Auth => KotaError::UpstreamAuth(err.message().to_string()),
        _ => KotaError::Git(err),
    }
}
