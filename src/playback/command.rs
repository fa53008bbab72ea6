//! Shell-style splitting of the configured sink command line.
//!
//! The sink is started directly (no shell), so the command string is split into
//! an argument vector here using POSIX shell quoting rules:
//! - unquoted whitespace separates words
//! - `'single quotes'` keep everything literally
//! - `"double quotes"` keep everything except `\"`, `\\`, `\$` and `` \` `` escapes
//! - a backslash outside quotes escapes the next character

/// Split a command line into words.
///
/// ## Returns:
/// - **Ok(words)**: the argument vector (empty for a blank line)
/// - **Err(message)**: unterminated quote or trailing backslash
pub fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err("Unterminated single quote in command line".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => {
                                return Err("Unterminated double quote in command line".to_string())
                            }
                        },
                        Some(c) => current.push(c),
                        None => return Err("Unterminated double quote in command line".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(c) => current.push(c),
                    None => return Err("Trailing backslash in command line".to_string()),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}
