use super::Response;

/// Extensions an upstream advertised in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<(String, Vec<String>)>,
}

impl Capabilities {
    /// Read the extension lines of an EHLO reply. The first line is the
    /// server's greeting and is skipped.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let keywords = response
            .lines
            .iter()
            .skip(1)
            .filter_map(|line| {
                // Some servers still send the pre-standard `AUTH=PLAIN LOGIN`
                let mut words = line.split(|c: char| c.is_whitespace() || c == '=');
                let keyword = words.next().filter(|k| !k.is_empty())?;
                Some((
                    keyword.to_ascii_uppercase(),
                    words
                        .filter(|w| !w.is_empty())
                        .map(str::to_string)
                        .collect(),
                ))
            })
            .collect();

        Self { keywords }
    }

    fn params(&self, keyword: &str) -> Option<&[String]> {
        self.keywords
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, params)| params.as_slice())
    }

    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.params(keyword).is_some()
    }

    /// Mechanisms from the `AUTH` line, upper-cased.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.keywords
            .iter()
            .filter(|(k, _)| k == "AUTH")
            .flat_map(|(_, params)| params.iter().map(|m| m.to_ascii_uppercase()))
            .collect()
    }

    /// The advertised `SIZE` limit. `None` when absent or zero (unlimited).
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.params("SIZE")?
            .first()?
            .parse()
            .ok()
            .filter(|&size| size > 0)
    }
}
