//! Project file utilities - centralized file walking and filtering
//!
//! Provides unified interfaces for walking project files with configurable
//! filtering, .gitignore support, and language-aware skipping.

pub mod walker;
