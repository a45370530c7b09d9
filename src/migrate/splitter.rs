//! Statement splitting for migration artifacts.
//!
//! Statement boundaries come from the Postgres parser, so string literals,
//! dollar-quoted bodies, comments and `BEGIN ATOMIC ... END` function bodies
//! stay intact. Text the parser rejects is split by the Postgres scanner
//! instead, which still respects quoting. Fragments that contain nothing but
//! whitespace and comments are dropped.

use pg_query::protobuf::Token;

/// Split SQL text into executable statements, in source order, without the
/// terminating `;`.
pub fn split_statements(sql: &str) -> Vec<String> {
    let fragments = match pg_query::split_with_parser(sql) {
        Ok(fragments) => fragments,
        Err(err) => {
            debug!("Parser could not split statements ({}), using the scanner", err);
            pg_query::split_with_scanner(sql).unwrap_or_else(|_| vec![sql])
        }
    };

    fragments
        .into_iter()
        .map(str::trim)
        .filter(|fragment| has_code(fragment))
        .map(str::to_string)
        .collect()
}

/// False for fragments made only of comments.
fn has_code(fragment: &str) -> bool {
    if fragment.is_empty() {
        return false;
    }

    match pg_query::scan(fragment) {
        Ok(scan) => scan.tokens.iter().any(|token| {
            token.token != Token::SqlComment as i32 && token.token != Token::CComment as i32
        }),
        Err(_) => true,
    }
}
