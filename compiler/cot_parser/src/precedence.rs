//! Operator precedence handling

/// Operator precedence levels, low to high. Assignment and ranges are
/// right-associative; everything else associates left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None = 0,
    Assignment = 1, // = and ternary ? :
    Coalesce = 2,   // ?:
    Or = 3,         // ||
    And = 4,        // &&
    Equality = 5,   // == !=
    Comparison = 6, // < > <= >=
    Range = 7,      // .. ..=
    Cast = 8,       // as, is
    Term = 9,       // + - | ^
    Factor = 10,    // * / % & << >>
    Unary = 11,     // ! - ~ *
    Call = 12,      // . () [] ?.
    Primary = 13,
}
