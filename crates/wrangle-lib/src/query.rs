//! Tokenizer and parser for the expression language and the frame query
//! language (`select <exprs> [by <keys>] [where <pred>]`).
//!
//! Parsing produces [`ScalarExpr`] trees; nothing here evaluates anything.

use crate::expr::{AggFunc, BinaryOp, Function, Literal, ScalarExpr};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Int(i64),
    Float(f64),
    String(String),
    /// Date literal in YYYY.MM.DD format, stored as ISO "YYYY-MM-DD"
    DateLiteral(String),
    /// Timestamp literal YYYY.MM.DDTHH:MM:SS[.fff...], stored as ISO
    TimestampLiteral(String),
    Op(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Select,
    Where,
    By,
}

/// Parse YYYY.MM.DD date literal (e.g. 2021.01.01). Returns ISO "YYYY-MM-DD" or None.
fn parse_date_literal(s: &str) -> Option<String> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let year: u32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let day: u32 = parts[2].parse().ok()?;
    if parts[0].len() != 4 || !(1000..=9999).contains(&year) {
        return None;
    }
    let date = chrono::NaiveDate::from_ymd_opt(year as i32, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Parse the `THH:MM:SS[.fff...]` tail of a timestamp literal. Consumes from chars.
fn parse_timestamp_literal(
    date_part: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Option<String> {
    if chars.peek() != Some(&'T') {
        return None;
    }
    chars.next();
    let mut time_part = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == ':' || c == '.' {
            time_part.push(c);
            chars.next();
        } else {
            break;
        }
    }
    let parts: Vec<&str> = time_part.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let (h, m, s) = (parts[0], parts[1], parts[2]);
    if h.len() != 2 || m.len() != 2 || s.len() < 2 {
        return None;
    }
    let (sec, frac) = s.split_once('.').unwrap_or((s, ""));
    let iso_date = parse_date_literal(date_part)?;
    let frac_padded = match frac.len() {
        0 => String::new(),
        1..=3 => format!(".{:0<3}", frac),
        4..=6 => format!(".{:0<6}", frac),
        _ => format!(".{:0<9}", &frac[..frac.len().min(9)]),
    };
    Some(format!("{}T{}:{}:{}{}", iso_date, h, m, sec, frac_padded))
}

fn read_string(
    quote: char,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<String, String> {
    chars.next();
    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some('\\') => value.push('\\'),
                Some(q) if q == quote => value.push(q),
                Some(other) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err("Unterminated escape sequence in string".to_string()),
            }
        } else if c == quote {
            return Ok(value);
        } else {
            value.push(c);
        }
    }
    Err("Unterminated string literal".to_string())
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            ':' => {
                tokens.push(Token::Colon);
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '[' => {
                tokens.push(Token::LBracket);
                chars.next();
            }
            ']' => {
                tokens.push(Token::RBracket);
                chars.next();
            }
            '"' | '\'' => tokens.push(Token::String(read_string(c, &mut chars)?)),
            '+' | '-' | '*' | '/' | '%' | '=' | '<' | '>' | '!' | '&' | '|' => {
                let mut op = c.to_string();
                chars.next();
                if let Some(&next_c) = chars.peek() {
                    if (c == '<' && (next_c == '=' || next_c == '>'))
                        || (matches!(c, '>' | '!' | '=') && next_c == '=')
                        || (c == '&' && next_c == '&')
                        || (c == '|' && next_c == '|')
                    {
                        op.push(next_c);
                        chars.next();
                    }
                }
                if op == "!" {
                    return Err("Unexpected character: !".to_string());
                }
                tokens.push(Token::Op(op));
            }
            '.' => {
                chars.next();
                if chars.peek().is_some_and(|nc| nc.is_ascii_digit()) {
                    let mut num_str = String::from("0.");
                    while let Some(&nc) = chars.peek() {
                        if nc.is_ascii_digit() {
                            num_str.push(nc);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let n = num_str
                        .parse::<f64>()
                        .map_err(|_| format!("Invalid number: {}", num_str))?;
                    tokens.push(Token::Float(n));
                } else {
                    tokens.push(Token::Dot);
                }
            }
            '0'..='9' => {
                let mut num_str = String::new();
                while let Some(&nc) = chars.peek() {
                    if nc.is_ascii_digit() || nc == '.' {
                        num_str.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if parse_date_literal(&num_str).is_some() && chars.peek() == Some(&'T') {
                    if let Some(iso) = parse_timestamp_literal(&num_str, &mut chars) {
                        tokens.push(Token::TimestampLiteral(iso));
                        continue;
                    }
                    return Err(format!("Invalid timestamp literal after {}", num_str));
                }
                if let Some(iso) = parse_date_literal(&num_str) {
                    tokens.push(Token::DateLiteral(iso));
                } else if !num_str.contains('.') {
                    let n = num_str
                        .parse::<i64>()
                        .map_err(|_| format!("Invalid number: {}", num_str))?;
                    tokens.push(Token::Int(n));
                } else {
                    let n = num_str
                        .parse::<f64>()
                        .map_err(|_| format!("Invalid number: {}", num_str))?;
                    tokens.push(Token::Float(n));
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&nc) = chars.peek() {
                    if nc.is_alphanumeric() || nc == '_' {
                        ident.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.to_lowercase().as_str() {
                    "select" => tokens.push(Token::Select),
                    "where" => tokens.push(Token::Where),
                    "by" => tokens.push(Token::By),
                    _ => tokens.push(Token::Identifier(ident)),
                }
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }
    Ok(tokens)
}

fn split_tokens(tokens: &[Token], delimiter: &Token) -> Vec<Vec<Token>> {
    let mut result = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0;

    for token in tokens {
        match token {
            Token::LParen | Token::LBracket => depth += 1,
            Token::RParen | Token::RBracket => depth -= 1,
            _ => {}
        }
        if depth == 0 && token == delimiter {
            result.push(std::mem::take(&mut current));
        } else {
            current.push(token.clone());
        }
    }
    result.push(current);
    result
}

fn is_keyword(token: Option<&Token>, word: &str) -> bool {
    matches!(token, Some(Token::Identifier(id)) if id.eq_ignore_ascii_case(word))
}

fn is_op(token: Option<&Token>, ops: &[&str]) -> bool {
    matches!(token, Some(Token::Op(op)) if ops.contains(&op.as_str()))
}

/// Tokens that can begin an operand of a bracketless call like `avg a`.
fn starts_operand(token: Option<&Token>) -> bool {
    matches!(
        token,
        Some(Token::Identifier(_))
            | Some(Token::Int(_))
            | Some(Token::Float(_))
            | Some(Token::String(_))
            | Some(Token::LParen)
    )
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: Token, context: &str) -> Result<(), String> {
        match self.advance() {
            Some(t) if *t == expected => Ok(()),
            Some(t) => Err(format!("Expected {:?} {}, found {:?}", expected, context, t)),
            None => Err(format!("Expected {:?} {}", expected, context)),
        }
    }

    fn parse_complete(mut self) -> Result<ScalarExpr, String> {
        if self.tokens.is_empty() {
            return Err("Empty expression".to_string());
        }
        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(t) => Err(format!("Unexpected token: {:?}", t)),
        }
    }

    fn parse_or(&mut self) -> Result<ScalarExpr, String> {
        let mut left = self.parse_and()?;
        while is_keyword(self.peek(), "or") || is_op(self.peek(), &["|", "||"]) {
            self.advance();
            let right = self.parse_and()?;
            left = left.or(right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ScalarExpr, String> {
        let mut left = self.parse_not()?;
        while is_keyword(self.peek(), "and") || is_op(self.peek(), &["&", "&&"]) {
            self.advance();
            let right = self.parse_not()?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ScalarExpr, String> {
        if is_keyword(self.peek(), "not") {
            self.advance();
            if self.peek() == Some(&Token::LBracket) {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(Token::RBracket, "to close not[...]")?;
                return Ok(inner.negate());
            }
            return Ok(self.parse_not()?.negate());
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<ScalarExpr, String> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => match op.as_str() {
                "=" | "==" => Some(BinaryOp::Eq),
                "!=" | "<>" => Some(BinaryOp::NotEq),
                "<" => Some(BinaryOp::Lt),
                "<=" => Some(BinaryOp::LtEq),
                ">" => Some(BinaryOp::Gt),
                ">=" => Some(BinaryOp::GtEq),
                _ => None,
            },
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let right = self.parse_additive()?;
                Ok(left.binary(op, right))
            }
            None => Ok(left),
        }
    }

    fn parse_additive(&mut self) -> Result<ScalarExpr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if is_op(self.peek(), &["+"]) {
                BinaryOp::Add
            } else if is_op(self.peek(), &["-"]) {
                BinaryOp::Sub
            } else {
                break;
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = left.binary(op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<ScalarExpr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if is_op(self.peek(), &["*"]) {
                BinaryOp::Mul
            } else if is_op(self.peek(), &["/"]) {
                BinaryOp::Div
            } else if is_op(self.peek(), &["%"]) {
                BinaryOp::Rem
            } else {
                break;
            };
            self.advance();
            let right = self.parse_unary()?;
            left = left.binary(op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ScalarExpr, String> {
        if is_op(self.peek(), &["-"]) {
            self.advance();
            return Ok(match self.parse_unary()? {
                ScalarExpr::Literal(Literal::Int(i)) => ScalarExpr::lit(Literal::Int(-i)),
                ScalarExpr::Literal(Literal::Float(f)) => ScalarExpr::lit(Literal::Float(-f)),
                other => ScalarExpr::Neg(Box::new(other)),
            });
        }
        let primary = self.parse_primary()?;
        self.parse_accessors(primary)
    }

    /// Dot accessors: `x.year`, `x.upper`, `x.starts_with["a"]`.
    fn parse_accessors(&mut self, mut expr: ScalarExpr) -> Result<ScalarExpr, String> {
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            let accessor = match self.advance() {
                Some(Token::Identifier(name)) => name.clone(),
                _ => return Err("Expected accessor name after '.'".to_string()),
            };
            let func = Function::from_name(&accessor).ok_or_else(|| {
                format!(
                    "Unknown accessor: '{}'. Valid: year, month, day, hour, minute, second, weekday, len, upper, lower, trim, abs, floor, ceil, is_null, is_not_null, starts_with, ends_with, contains, replace",
                    accessor
                )
            })?;
            let mut args = vec![expr];
            if matches!(self.peek(), Some(Token::LBracket) | Some(Token::LParen)) {
                args.extend(self.parse_call_args()?);
            }
            expr = ScalarExpr::call(func, args)?;
        }
        Ok(expr)
    }

    /// Arguments inside `[...]` or `(...)`, comma separated.
    fn parse_call_args(&mut self) -> Result<Vec<ScalarExpr>, String> {
        let close = match self.advance() {
            Some(Token::LBracket) => Token::RBracket,
            Some(Token::LParen) => Token::RParen,
            _ => return Err("Expected '[' or '('".to_string()),
        };
        let mut args = Vec::new();
        if self.peek() == Some(&close) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(t) if *t == close => return Ok(args),
                _ => return Err("Unmatched bracket in function call".to_string()),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<ScalarExpr, String> {
        let token = self
            .advance()
            .cloned()
            .ok_or_else(|| "Unexpected end of expression".to_string())?;
        match token {
            Token::Int(i) => Ok(ScalarExpr::lit(Literal::Int(i))),
            Token::Float(f) => Ok(ScalarExpr::lit(Literal::Float(f))),
            Token::String(s) => Ok(ScalarExpr::lit(Literal::Str(s))),
            Token::DateLiteral(iso) => Ok(ScalarExpr::lit(Literal::Date(iso))),
            Token::TimestampLiteral(iso) => Ok(ScalarExpr::lit(Literal::Timestamp(iso))),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "to close parenthesis")
                    .map_err(|_| "Unmatched parenthesis".to_string())?;
                Ok(inner)
            }
            Token::Identifier(name) => self.parse_identifier(name),
            other => Err(format!("Unexpected token in term: {:?}", other)),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Result<ScalarExpr, String> {
        let lower = name.to_lowercase();
        let call_follows = matches!(self.peek(), Some(Token::LBracket) | Some(Token::LParen));

        if lower == "col" && self.peek() == Some(&Token::LBracket) {
            self.advance();
            let col_name = match self.advance() {
                Some(Token::String(s)) | Some(Token::Identifier(s)) => s.clone(),
                _ => return Err("col[] must contain a string or identifier".to_string()),
            };
            self.expect(Token::RBracket, "to close col[]")
                .map_err(|_| "col[] must contain a single string or identifier".to_string())?;
            return Ok(ScalarExpr::Column(col_name));
        }

        if !call_follows {
            match lower.as_str() {
                "true" => return Ok(ScalarExpr::lit(Literal::Bool(true))),
                "false" => return Ok(ScalarExpr::lit(Literal::Bool(false))),
                "null" => return Ok(ScalarExpr::lit(Literal::Null)),
                _ => {}
            }
        }

        let agg = AggFunc::from_name(&lower);
        let func = Function::from_name(&lower);
        if call_follows && (agg.is_some() || func.is_some()) {
            let args = self.parse_call_args()?;
            if let Some(agg) = agg {
                return match args.len() {
                    0 if agg == AggFunc::Count => Ok(ScalarExpr::agg(agg, None)),
                    1 => Ok(ScalarExpr::agg(agg, args.into_iter().next())),
                    _ => Err(format!("Aggregation function {} requires one argument", name)),
                };
            }
            if let Some(func) = func {
                return ScalarExpr::call(func, args);
            }
        }
        if call_follows {
            return Err(format!("Unknown function: {}", name));
        }

        // Bracketless application binds to the next operand: `avg a`, `upper name`.
        if (agg.is_some() || func.is_some()) && starts_operand(self.peek()) {
            let arg = self.parse_unary()?;
            if let Some(agg) = agg {
                return Ok(ScalarExpr::agg(agg, Some(arg)));
            }
            if let Some(func) = func {
                return ScalarExpr::call(func, vec![arg]);
            }
        }
        Ok(ScalarExpr::Column(name))
    }
}

/// Parse a row-wise expression. Aggregates are rejected here.
pub fn parse_expression(text: &str) -> Result<ScalarExpr, String> {
    let tokens = tokenize(text)?;
    if tokens
        .iter()
        .any(|t| matches!(t, Token::Select | Token::Where | Token::By))
    {
        return Err("Expressions cannot contain select, by or where".to_string());
    }
    let expr = Parser::new(&tokens).parse_complete()?;
    if expr.contains_aggregate() {
        return Err(
            "Aggregate functions are only allowed in 'select ... by ...' queries".to_string(),
        );
    }
    Ok(expr)
}

/// An expression with the output column name it will be given.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpr {
    pub name: String,
    pub expr: ScalarExpr,
}

/// A parsed `select ... by ... where ...` frame query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameQuery {
    /// Empty selects every column.
    pub select: Vec<NamedExpr>,
    pub by: Vec<NamedExpr>,
    pub filter: Option<ScalarExpr>,
}

fn parse_alias(tokens: &[Token]) -> Result<String, String> {
    match tokens {
        [Token::Identifier(name)] => Ok(name.clone()),
        [Token::Identifier(c), Token::LBracket, Token::String(name) | Token::Identifier(name), Token::RBracket]
            if c == "col" =>
        {
            Ok(name.clone())
        }
        _ => Err("Alias must be an identifier or col[]".to_string()),
    }
}

fn parse_named_list(tokens: &[Token]) -> Result<Vec<NamedExpr>, String> {
    let mut out = Vec::new();
    for chunk in split_tokens(tokens, &Token::Comma) {
        if chunk.is_empty() {
            continue;
        }
        let parts = split_tokens(&chunk, &Token::Colon);
        let named = match parts.as_slice() {
            [expr] => {
                let expr = Parser::new(expr).parse_complete()?;
                NamedExpr {
                    name: expr.output_name(),
                    expr,
                }
            }
            [alias, expr] => NamedExpr {
                name: parse_alias(alias)?,
                expr: Parser::new(expr).parse_complete()?,
            },
            _ => return Err("Only one ':' alias is allowed per column".to_string()),
        };
        out.push(named);
    }
    Ok(out)
}

/// Parse a frame query. An empty query selects everything.
pub fn parse_query(query: &str) -> Result<FrameQuery, String> {
    if query.trim().is_empty() {
        return Ok(FrameQuery::default());
    }

    let tokens = tokenize(query)?;
    if tokens.first() != Some(&Token::Select) {
        return Err("Query must start with 'select'".to_string());
    }

    let mut parts = split_tokens(&tokens[1..], &Token::Where);
    let select_by_tokens = parts.remove(0);
    let where_tokens = if parts.is_empty() {
        None
    } else {
        Some(parts.remove(0))
    };
    if !parts.is_empty() {
        return Err("Only one 'where' clause is allowed".to_string());
    }

    let mut select_by_parts = split_tokens(&select_by_tokens, &Token::By);
    let cols_tokens = select_by_parts.remove(0);
    let by_tokens = select_by_parts.pop();

    let select = parse_named_list(&cols_tokens)?;
    let by = match by_tokens {
        Some(bt) => parse_named_list(&bt)?,
        None => Vec::new(),
    };
    for key in &by {
        if key.expr.contains_aggregate() {
            return Err(format!("Grouping key '{}' cannot be an aggregate", key.name));
        }
    }

    // Commas in the where clause are AND.
    let mut filter: Option<ScalarExpr> = None;
    if let Some(wt) = where_tokens {
        for chunk in split_tokens(&wt, &Token::Comma) {
            if chunk.is_empty() {
                continue;
            }
            let e = Parser::new(&chunk).parse_complete()?;
            if e.contains_aggregate() {
                return Err("Aggregate functions are not allowed in 'where'".to_string());
            }
            filter = Some(match filter {
                Some(curr) => curr.and(e),
                None => e,
            });
        }
    }

    Ok(FrameQuery { select, by, filter })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> ScalarExpr {
        ScalarExpr::column(name)
    }

    fn int(i: i64) -> ScalarExpr {
        ScalarExpr::lit(Literal::Int(i))
    }

    #[test]
    fn test_tokenize_simple() {
        let tokens = tokenize("select a, b where a > 10").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Select,
                Token::Identifier("a".to_string()),
                Token::Comma,
                Token::Identifier("b".to_string()),
                Token::Where,
                Token::Identifier("a".to_string()),
                Token::Op(">".to_string()),
                Token::Int(10),
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a != b == c <> d >= e").unwrap();
        let ops: Vec<Token> = tokens
            .into_iter()
            .filter(|t| matches!(t, Token::Op(_)))
            .collect();
        assert_eq!(
            ops,
            vec![
                Token::Op("!=".to_string()),
                Token::Op("==".to_string()),
                Token::Op("<>".to_string()),
                Token::Op(">=".to_string()),
            ]
        );
    }

    #[test]
    fn test_standard_precedence() {
        let e = parse_expression("a + b * 2").unwrap();
        assert_eq!(
            e,
            col("a").binary(BinaryOp::Add, col("b").binary(BinaryOp::Mul, int(2)))
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let e = parse_expression("a > 1 or b > 2 and c > 3").unwrap();
        let expected = col("a").binary(BinaryOp::Gt, int(1)).or(col("b")
            .binary(BinaryOp::Gt, int(2))
            .and(col("c").binary(BinaryOp::Gt, int(3))));
        assert_eq!(e, expected);
    }

    #[test]
    fn test_not_forms_are_equivalent() {
        let a = parse_expression("not[a = b]").unwrap();
        let b = parse_expression("not a = b").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, col("a").binary(BinaryOp::Eq, col("b")).negate());
    }

    #[test]
    fn test_single_and_double_quoted_strings() {
        let a = parse_expression("region == 'A'").unwrap();
        let b = parse_expression("region = \"A\"").unwrap();
        assert_eq!(a, b);
        let e = parse_expression("name == 'it\\'s'").unwrap();
        assert_eq!(
            e,
            col("name").binary(BinaryOp::Eq, ScalarExpr::lit(Literal::Str("it's".into())))
        );
    }

    #[test]
    fn test_col_syntax_with_spaces() {
        let e = parse_expression("col[\"unit price\"] * 2").unwrap();
        assert_eq!(e, col("unit price").binary(BinaryOp::Mul, int(2)));
    }

    #[test]
    fn test_accessors_and_calls_agree() {
        let a = parse_expression("ts.year").unwrap();
        let b = parse_expression("year(ts)").unwrap();
        let c = parse_expression("year[ts]").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        let s = parse_expression("name.starts_with[\"A\"]").unwrap();
        assert_eq!(
            s,
            ScalarExpr::call(
                Function::StartsWith,
                vec![col("name"), ScalarExpr::lit(Literal::Str("A".into()))]
            )
            .unwrap()
        );
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(parse_expression("system(\"rm -rf /\")").is_err());
        assert!(parse_expression("a.explode").is_err());
        assert!(parse_expression("a ; b").is_err());
    }

    #[test]
    fn test_aggregates_rejected_in_row_context() {
        let err = parse_expression("sum(amount) > 3").unwrap_err();
        assert!(err.contains("only allowed"), "got: {}", err);
    }

    #[test]
    fn test_date_and_timestamp_literals() {
        let d = parse_expression("d > 2021.01.01").unwrap();
        assert_eq!(
            d,
            col("d").binary(BinaryOp::Gt, ScalarExpr::lit(Literal::Date("2021-01-01".into())))
        );
        let t = parse_expression("t < 2021.01.01T10:30:00.5").unwrap();
        assert_eq!(
            t,
            col("t").binary(
                BinaryOp::Lt,
                ScalarExpr::lit(Literal::Timestamp("2021-01-01T10:30:00.500".into()))
            )
        );
        assert_eq!(
            parse_expression("x = 1.5").unwrap(),
            col("x").binary(BinaryOp::Eq, ScalarExpr::lit(Literal::Float(1.5)))
        );
    }

    #[test]
    fn test_impossible_calendar_dates_are_not_dates() {
        assert_eq!(parse_date_literal("2024.02.29").as_deref(), Some("2024-02-29"));
        assert_eq!(parse_date_literal("2023.02.29"), None);
        assert_eq!(parse_date_literal("2024.04.31"), None);
        assert_eq!(parse_date_literal("2024.13.01"), None);
        let err = parse_expression("d > 2024.02.31").unwrap_err();
        assert!(err.contains("2024.02.31"), "got: {}", err);
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(
            parse_expression("a > -3").unwrap(),
            col("a").binary(BinaryOp::Gt, int(-3))
        );
    }

    #[test]
    fn test_parse_query_select_by_where() {
        let q = parse_query("select total: sum amount, n: count() by region where amount > 5, id != 2")
            .unwrap();
        assert_eq!(q.select.len(), 2);
        assert_eq!(q.select[0].name, "total");
        assert_eq!(q.select[0].expr, ScalarExpr::agg(AggFunc::Sum, Some(col("amount"))));
        assert_eq!(q.select[1].expr, ScalarExpr::agg(AggFunc::Count, None));
        assert_eq!(q.by[0].name, "region");
        let expected = col("amount")
            .binary(BinaryOp::Gt, int(5))
            .and(col("id").binary(BinaryOp::NotEq, int(2)));
        assert_eq!(q.filter, Some(expected));
    }

    #[test]
    fn test_parse_query_accessor_naming() {
        let q = parse_query("select ts.year by ts.month").unwrap();
        assert_eq!(q.select[0].name, "ts_year");
        assert_eq!(q.by[0].name, "ts_month");
    }

    #[test]
    fn test_empty_query_selects_all() {
        let q = parse_query("   ").unwrap();
        assert!(q.select.is_empty() && q.by.is_empty() && q.filter.is_none());
        let q = parse_query("select where a > 1").unwrap();
        assert!(q.select.is_empty());
        assert!(q.filter.is_some());
    }

    #[test]
    fn test_invalid_queries() {
        assert!(parse_query("a, b").is_err());
        assert!(parse_query("select (a + b").is_err());
        assert!(parse_query("select a where a @ b").is_err());
        assert!(parse_query("select a by sum(b)").is_err());
    }
}
