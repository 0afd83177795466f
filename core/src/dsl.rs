/// Thresholds used when turning user input into full-text query markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DslPolicy {
    /// Terms at least this long get `*term~*` (substring + typos).
    pub typo_min_len: usize,
    /// Terms at least this long get `term~*` (prefix only).
    pub prefix_min_len: usize,
    /// Hard cap on the number of emitted terms.
    pub max_terms: usize,
    /// A query made of a single term shorter than this compiles to nothing.
    pub min_single_term_len: usize,
}

impl Default for DslPolicy {
    fn default() -> Self {
        Self { typo_min_len: 3, prefix_min_len: 2, max_terms: 8, min_single_term_len: 3 }
    }
}

/// Letters and decimal digits form words. Must agree with the engine's word rule.
#[inline]
pub fn is_word_char(c: char) -> bool {
    c.is_alphabetic() || c.is_ascii_digit()
}

/// Characters that keep an already open word open (`c++`, `well-known`, `tcp/ip`).
#[inline]
pub fn is_word_joiner(c: char) -> bool {
    matches!(c, '-' | '+' | '/')
}

impl DslPolicy {
    /// Compile raw user text into query markup, prefixed with the `@fields` boost list when given.
    ///
    /// Never fails. An empty string means there is nothing worth searching for.
    pub fn compile(&self, fields: &str, text: &str) -> String {
        let mut out = String::new();
        if !fields.is_empty() {
            out.push('@');
            out.push_str(fields);
            out.push(' ');
        }

        let mut cur = String::new();
        let mut cur_len = 0usize;
        let mut in_term = false;
        let mut terms = 0usize;
        let mut last_len = 0usize;

        // trailing space closes the last term
        let input = format!("{} ", text.trim());
        for c in input.chars() {
            if terms >= self.max_terms {
                break;
            }
            let word = is_word_char(c);
            if word && !in_term {
                cur.clear();
                cur_len = 0;
                in_term = true;
            }
            if in_term && !word && !is_word_joiner(c) {
                self.push_term(&mut out, &cur, cur_len, terms > 0);
                terms += 1;
                last_len = cur_len;
                in_term = false;
                continue;
            }
            if in_term {
                cur.push(c);
                cur_len += 1;
            }
        }

        if terms == 1 && last_len < self.min_single_term_len {
            return String::new();
        }
        out
    }

    fn push_term(&self, out: &mut String, term: &str, len: usize, join: bool) {
        if join {
            out.push('+');
        }
        if len >= self.typo_min_len {
            out.push('*');
            out.push_str(term);
            out.push_str("~*");
        } else if len >= self.prefix_min_len {
            out.push_str(term);
            out.push_str("~*");
        } else {
            out.push_str(term);
        }
        out.push(' ');
    }
}

/// Compile with the default policy.
pub fn compile(fields: &str, text: &str) -> String {
    DslPolicy::default().compile(fields, text)
}
