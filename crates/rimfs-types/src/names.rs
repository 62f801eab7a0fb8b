//! Module and package name forms.
//!
//! A module name is a single path segment (dots allowed, no `/`). A
//! package name is a dot-separated identifier such as `java.lang`,
//! mapped to the sub-path `java/lang` inside one or more modules.

/// Converts a dotted package name to its path form: `a.b.c` → `a/b/c`.
pub fn package_to_path(package: &str) -> String {
    package.replace('.', "/")
}

/// Converts a path back to the dotted package form: `a/b/c` → `a.b.c`.
pub fn path_to_package(path: &str) -> String {
    path.replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_path_conversion() {
        assert_eq!(package_to_path("java.lang"), "java/lang");
        assert_eq!(package_to_path("java"), "java");
        assert_eq!(path_to_package("java/lang/ref"), "java.lang.ref");
        assert_eq!(path_to_package(&package_to_path("a.b.c")), "a.b.c");
    }
}
