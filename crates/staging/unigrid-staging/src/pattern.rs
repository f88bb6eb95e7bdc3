use regex::Regex;

/// Whether a path's last segment contains a `*` or `?` wildcard
pub fn has_wildcard(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.contains('*') || name.contains('?')
}

/// Shell style file name pattern.
///
/// `*` matches any run of characters and `?` exactly one, neither crossing a
/// `/`. Everything else matches literally.
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(glob.len() * 2 + 2);
        expr.push('^');
        for c in glob.chars() {
            match c {
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        Ok(Self {
            glob: glob.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}
