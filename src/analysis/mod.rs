/// Text analysis pipeline, reduced from the teacher's full tokenizer/
/// filter/stemmer stack to what tokenized indexing needs: split on
/// whitespace, lowercase. No stemming, no stop words, no language-specific
/// tokenizers.
pub struct Analyzer {
    name: &'static str,
}

impl Analyzer {
    pub fn whitespace() -> Self {
        Analyzer { name: "whitespace" }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|w| w.to_lowercase()).filter(|w| !w.is_empty()).collect()
    }

    /// Every non-empty prefix of every token, for `tokenization: all`
    /// index properties — supports the `%` prefix operator without a
    /// separate trie structure.
    pub fn tokenize_with_prefixes(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for token in self.tokenize(text) {
            let mut end = 0;
            for (i, _) in token.char_indices().skip(1) {
                out.push(token[..i].to_string());
                end = i;
            }
            let _ = end;
            out.push(token);
        }
        out
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer::whitespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_and_lowercases() {
        let analyzer = Analyzer::whitespace();
        assert_eq!(analyzer.tokenize("Hello World"), vec!["hello", "world"]);
    }

    #[test]
    fn tokenize_with_prefixes_includes_every_prefix() {
        let analyzer = Analyzer::whitespace();
        let prefixes = analyzer.tokenize_with_prefixes("ab");
        assert_eq!(prefixes, vec!["a", "ab"]);
    }
}
