#![allow(dead_code)]

pub mod harness;

use std::fs;
use std::path::Path;

pub fn create_dir_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).unwrap();
    for (rel_path, content) in files {
        let full = root.join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) {
    fs::create_dir_all(dst).unwrap();
    for entry in fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path);
        } else {
            fs::copy(&src_path, &dst_path).unwrap();
        }
    }
}

/// Version 1 of the installation used across scenarios.
pub fn older_tree() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("readme.txt", b"Hello, World! This is version 1.".to_vec()),
        ("config/settings.json", b"{\"version\": 1, \"debug\": false}".to_vec()),
        ("data/records.bin", vec![0xAA; 8192]),
        ("data/old_file.txt", b"This file will be deleted".to_vec()),
        ("obsolete/remove_me.txt", b"Going away".to_vec()),
    ]
}

/// Version 2: modifications, additions and deletions relative to version 1.
pub fn newer_tree() -> Vec<(&'static str, Vec<u8>)> {
    let mut modified_bin = vec![0xAA; 4096];
    modified_bin.extend_from_slice(&[0xBB; 4096]);
    vec![
        ("readme.txt", b"Hello, World! This is version 2 with new features.".to_vec()),
        ("config/settings.json", b"{\"version\": 2, \"debug\": true, \"newField\": 42}".to_vec()),
        ("data/records.bin", modified_bin),
        ("data/new_file.txt", b"Brand new file in version 2".to_vec()),
        ("extras/bonus.dat", vec![0xFF; 1024]),
    ]
}

pub fn write_tree(root: &Path, files: &[(&'static str, Vec<u8>)]) {
    let borrowed: Vec<(&str, &[u8])> = files.iter().map(|(p, d)| (*p, d.as_slice())).collect();
    create_dir_tree(root, &borrowed);
}
