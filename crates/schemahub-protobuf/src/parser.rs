//! Hand-written `.proto` lexer and recursive-descent parser.
//!
//! Covers the proto2/proto3 surface a registry sees: syntax, package,
//! imports, options, messages, fields, oneofs, maps, enums, reserved
//! ranges, extensions, and service blocks (parsed and discarded — services
//! have no wire effect). Groups are not supported.

use crate::ast::{EnumDef, FieldDef, FieldType, Label, MessageDef, ProtoFile, Syntax};

/// Parse failure with the line it occurred on.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

// ─── Lexer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    /// Raw numeric literal text (decimal, hex, or float).
    Number(String),
    Str(String),
    Punct(char),
}

fn lex(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                match chars.peek() {
                    Some('/') => {
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = '\0';
                        let mut closed = false;
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                            }
                            if prev == '*' && c == '/' {
                                closed = true;
                                break;
                            }
                            prev = c;
                        }
                        if !closed {
                            return Err(ParseError {
                                line,
                                message: "unterminated block comment".into(),
                            });
                        }
                    }
                    _ => {
                        return Err(ParseError {
                            line,
                            message: "unexpected '/'".into(),
                        })
                    }
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\n' {
                        line += 1;
                    }
                    if c == '\\' {
                        match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('r') => value.push('\r'),
                            Some(other) => value.push(other),
                            None => break,
                        }
                    } else {
                        value.push(c);
                    }
                }
                if !closed {
                    return Err(ParseError {
                        line,
                        message: "unterminated string literal".into(),
                    });
                }
                tokens.push((Token::Str(value), line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(ident), line));
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '+' || c == '-' {
                        // Exponent signs only follow 'e'/'E'.
                        if (c == '+' || c == '-')
                            && !matches!(literal.chars().last(), Some('e') | Some('E'))
                        {
                            break;
                        }
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Number(literal), line));
            }
            c => {
                chars.next();
                tokens.push((Token::Punct(c), line));
            }
        }
    }
    Ok(tokens)
}

// ─── Parser ───────────────────────────────────────────────────────────────────

pub fn parse(source: &str) -> Result<ProtoFile, ParseError> {
    let tokens = lex(source)?;
    Parser { tokens, pos: 0 }.parse_file()
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, line)| *line)
            .unwrap_or(1)
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{c}'")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.err("expected identifier"))
            }
        }
    }

    fn expect_str(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.err("expected string literal"))
            }
        }
    }

    fn expect_int(&mut self) -> Result<i32, ParseError> {
        let negative = self.eat_punct('-');
        match self.next() {
            Some(Token::Number(raw)) => {
                let value = if let Some(hex) = raw.strip_prefix("0x").or(raw.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16).ok()
                } else {
                    raw.parse::<i64>().ok()
                };
                match value {
                    Some(v) => {
                        let v = if negative { -v } else { v };
                        i32::try_from(v).map_err(|_| self.err("integer out of range"))
                    }
                    None => Err(self.err(format!("invalid integer literal '{raw}'"))),
                }
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.err("expected integer"))
            }
        }
    }

    fn parse_file(mut self) -> Result<ProtoFile, ParseError> {
        let mut file = ProtoFile {
            syntax: Syntax::Proto2,
            package: None,
            imports: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
        };

        if self.eat_keyword("syntax") {
            self.expect_punct('=')?;
            let syntax = self.expect_str()?;
            file.syntax = match syntax.as_str() {
                "proto2" => Syntax::Proto2,
                "proto3" => Syntax::Proto3,
                other => return Err(self.err(format!("unsupported syntax '{other}'"))),
            };
            self.expect_punct(';')?;
        }

        while self.pos < self.tokens.len() {
            if self.eat_punct(';') {
                continue;
            }
            let ident = match self.peek() {
                Some(Token::Ident(s)) => s.clone(),
                _ => return Err(self.err("unexpected token")),
            };
            {
                match ident.as_str() {
                    "import" => {
                        self.pos += 1;
                        // `public` / `weak` modifiers don't change resolution here.
                        let _ = self.eat_keyword("public") || self.eat_keyword("weak");
                        file.imports.push(self.expect_str()?);
                        self.expect_punct(';')?;
                    }
                    "package" => {
                        self.pos += 1;
                        if file.package.is_some() {
                            return Err(self.err("duplicate package declaration"));
                        }
                        file.package = Some(self.expect_ident()?);
                        self.expect_punct(';')?;
                    }
                    "option" => {
                        self.pos += 1;
                        self.skip_option()?;
                    }
                    "message" => {
                        self.pos += 1;
                        file.messages.push(self.parse_message()?);
                    }
                    "enum" => {
                        self.pos += 1;
                        file.enums.push(self.parse_enum()?);
                    }
                    "service" => {
                        self.pos += 1;
                        let _ = self.expect_ident()?;
                        self.skip_braced()?;
                    }
                    "extend" => {
                        self.pos += 1;
                        let _ = self.parse_type_name()?;
                        self.skip_braced()?;
                    }
                    other => return Err(self.err(format!("unexpected '{other}'"))),
                }
            }
        }
        Ok(file)
    }

    fn parse_message(&mut self) -> Result<MessageDef, ParseError> {
        let mut message = MessageDef {
            name: self.expect_ident()?,
            ..MessageDef::default()
        };
        self.expect_punct('{')?;

        loop {
            if self.eat_punct('}') {
                return Ok(message);
            }
            if self.eat_punct(';') {
                continue;
            }
            let ident = match self.peek() {
                Some(Token::Ident(s)) => s.clone(),
                // Fully-qualified field type with a leading dot.
                Some(Token::Punct('.')) => {
                    let field = self.parse_field(Label::Singular, None)?;
                    message.fields.push(field);
                    continue;
                }
                _ => return Err(self.err("expected message body element")),
            };
            match ident.as_str() {
                "message" => {
                    self.pos += 1;
                    let nested = self.parse_message()?;
                    message.messages.push(nested);
                }
                "enum" => {
                    self.pos += 1;
                    let nested = self.parse_enum()?;
                    message.enums.push(nested);
                }
                "oneof" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    let index = message.oneofs.len();
                    message.oneofs.push(name);
                    self.expect_punct('{')?;
                    loop {
                        if self.eat_punct('}') {
                            break;
                        }
                        if self.eat_punct(';') {
                            continue;
                        }
                        if self.eat_keyword("option") {
                            self.skip_option()?;
                            continue;
                        }
                        let field = self.parse_field(Label::Singular, Some(index))?;
                        message.fields.push(field);
                    }
                }
                "option" => {
                    self.pos += 1;
                    self.skip_option()?;
                }
                "reserved" | "extensions" => {
                    self.pos += 1;
                    self.skip_to_semicolon();
                }
                "extend" => {
                    self.pos += 1;
                    let _ = self.parse_type_name()?;
                    self.skip_braced()?;
                }
                "group" => return Err(self.err("group fields are not supported")),
                "optional" | "required" | "repeated" => {
                    let label = match ident.as_str() {
                        "optional" => Label::Optional,
                        "required" => Label::Required,
                        _ => Label::Repeated,
                    };
                    self.pos += 1;
                    let field = self.parse_field(label, None)?;
                    message.fields.push(field);
                }
                _ => {
                    let field = self.parse_field(Label::Singular, None)?;
                    message.fields.push(field);
                }
            }
        }
    }

    fn parse_field(
        &mut self,
        label: Label,
        oneof: Option<usize>,
    ) -> Result<FieldDef, ParseError> {
        let ty = self.parse_type()?;
        let name = self.expect_ident()?;
        self.expect_punct('=')?;
        let number = self.expect_int()?;
        let packed = if self.eat_punct('[') {
            self.parse_field_options()?
        } else {
            None
        };
        self.expect_punct(';')?;
        Ok(FieldDef {
            name,
            number,
            label,
            ty,
            oneof,
            packed,
        })
    }

    /// Parse `[name = value, ...]`, returning the `packed` setting if
    /// present. Everything else has no wire effect and is dropped.
    fn parse_field_options(&mut self) -> Result<Option<bool>, ParseError> {
        let mut packed = None;
        loop {
            if self.eat_punct(']') {
                return Ok(packed);
            }
            // Option name: idents and punctuation up to '='.
            let mut name = String::new();
            loop {
                match self.peek() {
                    Some(Token::Punct('=')) => {
                        self.pos += 1;
                        break;
                    }
                    Some(Token::Ident(s)) => {
                        name.push_str(s);
                        self.pos += 1;
                    }
                    Some(Token::Punct(c @ ('(' | ')' | '.'))) => {
                        name.push(*c);
                        self.pos += 1;
                    }
                    _ => return Err(self.err("malformed field option")),
                }
            }
            // Option value: a literal, ident, or aggregate `{...}`.
            let mut is_true = None;
            if self.eat_punct('{') {
                self.skip_until_close('{', '}')?;
            } else {
                match self.next() {
                    Some(Token::Ident(v)) => is_true = Some(v == "true"),
                    Some(Token::Number(_)) | Some(Token::Str(_)) => {}
                    Some(Token::Punct('-')) => {
                        let _ = self.next();
                    }
                    _ => return Err(self.err("malformed field option value")),
                }
            }
            if name == "packed" {
                packed = is_true;
            }
            let _ = self.eat_punct(',');
        }
    }

    fn parse_type(&mut self) -> Result<FieldType, ParseError> {
        if self.eat_punct('.') {
            let name = self.expect_ident()?;
            return Ok(FieldType::Named(format!(".{name}")));
        }
        let ident = self.expect_ident()?;
        Ok(match ident.as_str() {
            "int32" => FieldType::Int32,
            "int64" => FieldType::Int64,
            "uint32" => FieldType::Uint32,
            "uint64" => FieldType::Uint64,
            "sint32" => FieldType::Sint32,
            "sint64" => FieldType::Sint64,
            "fixed32" => FieldType::Fixed32,
            "sfixed32" => FieldType::Sfixed32,
            "fixed64" => FieldType::Fixed64,
            "sfixed64" => FieldType::Sfixed64,
            "bool" => FieldType::Bool,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "string" => FieldType::String,
            "bytes" => FieldType::Bytes,
            "map" => {
                self.expect_punct('<')?;
                let key = self.parse_type()?;
                self.expect_punct(',')?;
                let value = self.parse_type()?;
                self.expect_punct('>')?;
                FieldType::Map(Box::new(key), Box::new(value))
            }
            _ => FieldType::Named(ident),
        })
    }

    fn parse_type_name(&mut self) -> Result<String, ParseError> {
        if self.eat_punct('.') {
            Ok(format!(".{}", self.expect_ident()?))
        } else {
            self.expect_ident()
        }
    }

    fn parse_enum(&mut self) -> Result<EnumDef, ParseError> {
        let name = self.expect_ident()?;
        let mut values = Vec::new();
        self.expect_punct('{')?;
        loop {
            if self.eat_punct('}') {
                return Ok(EnumDef { name, values });
            }
            if self.eat_punct(';') {
                continue;
            }
            if self.eat_keyword("option") {
                self.skip_option()?;
                continue;
            }
            if self.eat_keyword("reserved") {
                self.skip_to_semicolon();
                continue;
            }
            let value_name = self.expect_ident()?;
            self.expect_punct('=')?;
            let number = self.expect_int()?;
            if self.eat_punct('[') {
                self.skip_until_close('[', ']')?;
            }
            self.expect_punct(';')?;
            values.push((value_name, number));
        }
    }

    /// Skip an option statement up to and including its terminating `;`,
    /// tolerating aggregate `{ ... }` values.
    fn skip_option(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        while let Some(token) = self.next() {
            match token {
                Token::Punct('{') => depth += 1,
                Token::Punct('}') => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.err("unbalanced '}' in option"))?;
                }
                Token::Punct(';') if depth == 0 => return Ok(()),
                _ => {}
            }
        }
        Err(self.err("unterminated option"))
    }

    fn skip_to_semicolon(&mut self) {
        while let Some(token) = self.next() {
            if token == Token::Punct(';') {
                return;
            }
        }
    }

    /// Skip a `{ ... }` block including nested braces.
    fn skip_braced(&mut self) -> Result<(), ParseError> {
        self.expect_punct('{')?;
        self.skip_until_close('{', '}')
    }

    /// Skip until the closing delimiter, assuming the opener was consumed.
    fn skip_until_close(&mut self, open: char, close: char) -> Result<(), ParseError> {
        let mut depth = 1usize;
        while let Some(token) = self.next() {
            if token == Token::Punct(open) {
                depth += 1;
            } else if token == Token::Punct(close) {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(self.err(format!("unterminated '{open}' block")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_proto3_file() {
        let file = parse(
            r#"
            syntax = "proto3";
            package acme.orders;

            import "google/protobuf/timestamp.proto";

            // An order event.
            message Order {
                string id = 1;
                repeated Line lines = 2;
                google.protobuf.Timestamp created = 3;
                map<string, string> labels = 4;

                oneof payment {
                    string card_token = 5;
                    int64 account_id = 6;
                }

                message Line {
                    string sku = 1;
                    int32 quantity = 2;
                }

                enum Status {
                    UNKNOWN = 0;
                    PLACED = 1;
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(file.syntax, Syntax::Proto3);
        assert_eq!(file.package.as_deref(), Some("acme.orders"));
        assert_eq!(file.imports, vec!["google/protobuf/timestamp.proto"]);

        let order = &file.messages[0];
        assert_eq!(order.name, "Order");
        assert_eq!(order.fields.len(), 6);
        assert_eq!(order.oneofs, vec!["payment"]);
        assert_eq!(order.messages[0].name, "Line");
        assert_eq!(order.enums[0].name, "Status");

        let card = order.fields.iter().find(|f| f.name == "card_token").unwrap();
        assert_eq!(card.oneof, Some(0));
        assert_eq!(card.number, 5);

        let labels = order.fields.iter().find(|f| f.name == "labels").unwrap();
        assert!(matches!(labels.ty, FieldType::Map(_, _)));
    }

    #[test]
    fn parses_proto2_labels_and_options() {
        let file = parse(
            r#"
            syntax = "proto2";
            message Legacy {
                required int32 id = 1;
                optional string name = 2 [default = "anon"];
                repeated int32 scores = 3 [packed = true];
                reserved 4, 5;
                extensions 100 to 199;
            }
            "#,
        )
        .unwrap();
        let legacy = &file.messages[0];
        assert_eq!(legacy.fields[0].label, Label::Required);
        assert_eq!(legacy.fields[1].label, Label::Optional);
        assert_eq!(legacy.fields[2].packed, Some(true));
    }

    #[test]
    fn missing_syntax_defaults_to_proto2() {
        let file = parse("message M { optional int32 a = 1; }").unwrap();
        assert_eq!(file.syntax, Syntax::Proto2);
    }

    #[test]
    fn services_are_discarded() {
        let file = parse(
            r#"
            syntax = "proto3";
            message Ping { string msg = 1; }
            service Echo {
                rpc Send (Ping) returns (Ping) {}
            }
            "#,
        )
        .unwrap();
        assert_eq!(file.messages.len(), 1);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("syntax = \"proto3\";\nmessage M {\n  int32 = 1;\n}").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.to_string().starts_with("line 3:"));
    }

    #[test]
    fn comments_are_skipped() {
        let file = parse(
            "// leading\nsyntax = \"proto3\"; /* block\n comment */ message M { int32 a = 1; }",
        )
        .unwrap();
        assert_eq!(file.messages[0].fields[0].name, "a");
    }

    #[test]
    fn negative_enum_values() {
        let file = parse(
            r#"syntax = "proto3"; enum Wind { UNKNOWN = 0; SOUTH = -1; }"#,
        );
        // proto3 enums reject negatives in protoc, but the registry parser
        // accepts what the wire supports.
        assert_eq!(file.unwrap().enums[0].values[1], ("SOUTH".to_string(), -1));
    }
}
