//! Path and permission helpers shared across the volume modules.

use std::path::{Component, Path, PathBuf};

/// Lexical normalization: drop `.` components and trailing separators so the
/// same mount point discovered by two mechanisms compares equal.
pub fn normalize_path(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			other => out.push(other.as_os_str()),
		}
	}
	out
}

/// Identity used for deduplication: resolve symlinked mount roots when
/// possible, fall back to lexical normalization for paths that do not exist.
pub fn volume_identity(path: &Path) -> PathBuf {
	std::fs::canonicalize(path).unwrap_or_else(|_| normalize_path(path))
}

/// Render unix mode bits the way `ls -ld` does, e.g. `drwxrwxr-x`.
#[cfg(unix)]
pub fn format_mode(mode: u32) -> String {
	let kind = match mode & libc::S_IFMT as u32 {
		m if m == libc::S_IFDIR as u32 => 'd',
		m if m == libc::S_IFLNK as u32 => 'l',
		m if m == libc::S_IFBLK as u32 => 'b',
		m if m == libc::S_IFCHR as u32 => 'c',
		m if m == libc::S_IFIFO as u32 => 'p',
		m if m == libc::S_IFSOCK as u32 => 's',
		_ => '-',
	};
	let mut out = String::with_capacity(10);
	out.push(kind);
	for shift in [6u32, 3, 0] {
		let bits = (mode >> shift) & 0o7;
		out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
		out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
		out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn normalization_strips_cur_dir_and_trailing_separator() {
		assert_eq!(
			normalize_path(Path::new("/storage/./1234-5678/")),
			PathBuf::from("/storage/1234-5678")
		);
		assert_eq!(normalize_path(Path::new("/storage")), PathBuf::from("/storage"));
	}

	#[cfg(unix)]
	#[test]
	fn mode_bits_render_like_ls() {
		assert_eq!(format_mode(libc::S_IFDIR as u32 | 0o775), "drwxrwxr-x");
		assert_eq!(format_mode(libc::S_IFREG as u32 | 0o640), "-rw-r-----");
	}
}
