//! Minimal parser for zero-context unified diffs (`git diff -U0`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$").unwrap());

/// One `@@` hunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    /// Text after the second `@@` (enclosing function, when git found one)
    pub context: String,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl Hunk {
    /// Modified range in old-file coordinates. Pure insertions are a point.
    pub fn old_range(&self) -> (usize, usize) {
        if self.old_len == 0 {
            (self.old_start, self.old_start)
        } else {
            (self.old_start, self.old_start + self.old_len - 1)
        }
    }

    pub fn changed_lines(&self) -> impl Iterator<Item = &str> {
        self.removed.iter().chain(self.added.iter()).map(String::as_str)
    }
}

/// All hunks for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub hunks: Vec<Hunk>,
    /// Raw diff text for this file, headers included
    pub raw: String,
}

impl FileDiff {
    pub fn changed_lines(&self) -> impl Iterator<Item = &str> {
        self.hunks.iter().flat_map(|h| h.changed_lines())
    }

    pub fn added_lines(&self) -> impl Iterator<Item = &str> {
        self.hunks.iter().flat_map(|h| h.added.iter().map(String::as_str))
    }

    pub fn removed_lines(&self) -> impl Iterator<Item = &str> {
        self.hunks.iter().flat_map(|h| h.removed.iter().map(String::as_str))
    }
}

/// Two ranges overlap or lie within one line of each other.
pub fn ranges_touch(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 <= b.1 + 1 && b.0 <= a.1 + 1
}

/// Parse a multi-file diff into per-file entries keyed by path.
pub fn parse(diff: &str) -> BTreeMap<String, FileDiff> {
    let mut files: BTreeMap<String, FileDiff> = BTreeMap::new();
    let mut current: Option<FileDiff> = None;
    let mut old_path: Option<String> = None;
    // `---`/`+++` are file headers only before the first hunk.
    let mut in_header = false;

    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            flush(current.take(), &mut files);
            old_path = None;
            in_header = true;
            current = Some(FileDiff {
                path: git_header_path(line).unwrap_or_default(),
                ..FileDiff::default()
            });
        } else if (in_header || current.is_none())
            && let Some(rest) = line.strip_prefix("--- ")
        {
            old_path = strip_side(rest);
            in_header = true;
            if current.is_none() {
                current = Some(FileDiff::default());
            }
        } else if in_header
            && let Some(rest) = line.strip_prefix("+++ ")
            && let Some(file) = current.as_mut()
        {
            if let Some(path) = strip_side(rest).or_else(|| old_path.clone()) {
                file.path = path;
            }
        } else if let Some(caps) = HUNK_HEADER.captures(line)
            && let Some(file) = current.as_mut()
        {
            in_header = false;
            let num = |i: usize, default: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(default)
            };
            file.hunks.push(Hunk {
                old_start: num(1, 0),
                old_len: num(2, 1),
                new_start: num(3, 0),
                new_len: num(4, 1),
                context: caps.get(5).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                removed: Vec::new(),
                added: Vec::new(),
            });
        } else if !in_header
            && let Some(file) = current.as_mut()
            && let Some(hunk) = file.hunks.last_mut()
        {
            if let Some(text) = line.strip_prefix('+') {
                hunk.added.push(text.to_string());
            } else if let Some(text) = line.strip_prefix('-') {
                hunk.removed.push(text.to_string());
            }
        }

        if let Some(file) = current.as_mut() {
            file.raw.push_str(line);
            file.raw.push('\n');
        }
    }
    flush(current.take(), &mut files);
    files
}

fn flush(file: Option<FileDiff>, files: &mut BTreeMap<String, FileDiff>) {
    if let Some(file) = file
        && !file.path.is_empty()
    {
        files.insert(file.path.clone(), file);
    }
}

/// Raw diff text of one file, if the diff touches it.
pub fn file_section(diff: &str, path: &str) -> Option<String> {
    parse(diff).remove(path).map(|f| f.raw)
}

/// Path from `--- a/x` / `+++ b/x`; `None` for `/dev/null`.
fn strip_side(rest: &str) -> Option<String> {
    let rest = rest.trim_end();
    if rest == "/dev/null" {
        return None;
    }
    let path = rest
        .strip_prefix("a/")
        .or_else(|| rest.strip_prefix("b/"))
        .unwrap_or(rest);
    Some(path.to_string())
}

/// `diff --git a/x b/x` -> `x` (used until the `+++` line names it).
fn git_header_path(line: &str) -> Option<String> {
    let rest = line.strip_prefix("diff --git ")?;
    let idx = rest.rfind(" b/")?;
    Some(rest[idx + 3..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -3,2 +3,3 @@ fn parse(input: &str) -> Ast {
-    let x = 1;
-    let y = 2;
+    let x = 10;
+    let y = 20;
+    let z = 30;
@@ -10,0 +12 @@ fn render() {
+    println!(\"hi\");
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+hello
+world
diff --git a/gone.txt b/gone.txt
deleted file mode 100644
--- a/gone.txt
+++ /dev/null
@@ -1 +0,0 @@
-bye
";

    #[test]
    fn test_parse_files() {
        let files = parse(DIFF);
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["gone.txt", "new.txt", "src/lib.rs"]);
    }

    #[test]
    fn test_parse_hunks() {
        let files = parse(DIFF);
        let lib = &files["src/lib.rs"];
        assert_eq!(lib.hunks.len(), 2);

        let first = &lib.hunks[0];
        assert_eq!((first.old_start, first.old_len, first.new_start, first.new_len), (3, 2, 3, 3));
        assert_eq!(first.context, "fn parse(input: &str) -> Ast {");
        assert_eq!(first.removed.len(), 2);
        assert_eq!(first.added.len(), 3);
        assert_eq!(first.old_range(), (3, 4));

        let second = &lib.hunks[1];
        assert_eq!((second.old_len, second.new_len), (0, 1));
        assert_eq!(second.old_range(), (10, 10));
        assert!(lib.raw.starts_with("diff --git a/src/lib.rs"));
    }

    #[test]
    fn test_new_and_deleted_files() {
        let files = parse(DIFF);
        assert_eq!(files["new.txt"].added_lines().collect::<Vec<_>>(), vec!["hello", "world"]);
        assert_eq!(files["gone.txt"].removed_lines().collect::<Vec<_>>(), vec!["bye"]);
    }

    #[test]
    fn test_ranges_touch() {
        assert!(ranges_touch((3, 4), (4, 6)));
        assert!(ranges_touch((3, 4), (5, 5)));
        assert!(!ranges_touch((3, 4), (6, 8)));
        assert!(ranges_touch((10, 10), (10, 12)));
    }

    #[test]
    fn test_removed_line_resembling_header() {
        let diff = "\
diff --git a/q.sql b/q.sql
--- a/q.sql
+++ b/q.sql
@@ -2 +2 @@
--- old comment
+-- new comment
";
        let files = parse(diff);
        let q = &files["q.sql"];
        assert_eq!(q.hunks[0].removed, vec!["-- old comment".to_string()]);
        assert_eq!(q.hunks[0].added, vec!["-- new comment".to_string()]);
    }

    #[test]
    fn test_file_section() {
        let section = file_section(DIFF, "new.txt").unwrap();
        assert!(section.starts_with("diff --git a/new.txt"));
        assert!(section.contains("+hello"));
        assert!(!section.contains("src/lib.rs"));
        assert!(file_section(DIFF, "missing").is_none());
    }

    #[test]
    fn test_empty_diff() {
        assert!(parse("").is_empty());
    }
}
