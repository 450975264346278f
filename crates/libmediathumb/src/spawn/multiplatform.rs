use std::{
	ffi::OsString,
	process::Command,
};

// This file still exists and is seperated for future quick changes

/// Resolve the binary to spawn, using `env_override` if it is set and not empty
pub fn resolve_binary(binary_name: &str, env_override: &str) -> OsString {
	return std::env::var_os(env_override)
		.filter(|v| return !v.is_empty())
		.unwrap_or_else(|| return OsString::from(binary_name));
}

/// Spawn a binary in non-windows / DOS systems
#[cfg(not(target_os = "windows"))]
#[inline]
pub fn spawn_command(binary_name: &str, env_override: &str) -> Command {
	return Command::new(resolve_binary(binary_name, env_override));
}

/// Spawn a binary for windows / DOS systems
/// Apparently, rust automatically adds a extensions (".exe") if none is specified
/// Also, rust automatically searches all the paths, including the mediathumb binary path
#[cfg(target_os = "windows")]
#[inline]
pub fn spawn_command(binary_name: &str, env_override: &str) -> Command {
	use std::os::windows::process::CommandExt;

	/// Flag to not create a console window for every spawned process
	const CREATE_NO_WINDOW: u32 = 0x0800_0000;

	let mut cmd = Command::new(resolve_binary(binary_name, env_override));
	cmd.creation_flags(CREATE_NO_WINDOW);

	return cmd;
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_resolve_binary_default() {
		assert_eq!(
			OsString::from("ffmpeg"),
			resolve_binary("ffmpeg", "MEDIATHUMB_TEST_UNSET_VARIABLE")
		);
	}
}
