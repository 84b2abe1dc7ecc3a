/*!
 * Data Structures
 *
 * Specialized data structures for the socket layer:
 * - Inline strings for error context without heap allocation
 */

mod inline_string;

pub use inline_string::InlineString;
