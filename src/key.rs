//! Cache key derivation.
//!
//! A key is derived from the arguments of a call, either by filling a template
//! such as `"user:{}"` or by a user-supplied function.

use std::fmt;
use std::sync::Arc;

/// Arguments that can fill the positional placeholders of a key template.
///
/// Implemented for `()`, common scalar types, strings and tuples of up to four
/// `Display` values.
pub trait KeyArgs {
    /// The positional parts, in order.
    fn key_parts(&self) -> Vec<String>;
}

impl KeyArgs for () {
    fn key_parts(&self) -> Vec<String> {
        Vec::new()
    }
}

impl KeyArgs for str {
    fn key_parts(&self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl<T: KeyArgs + ?Sized> KeyArgs for &T {
    fn key_parts(&self) -> Vec<String> {
        (**self).key_parts()
    }
}

macro_rules! impl_key_args_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyArgs for $t {
                fn key_parts(&self) -> Vec<String> {
                    vec![self.to_string()]
                }
            }
        )*
    };
}

impl_key_args_scalar!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char, String
);

macro_rules! impl_key_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: fmt::Display),+> KeyArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn key_parts(&self) -> Vec<String> {
                let ($($name,)+) = self;
                vec![$($name.to_string()),+]
            }
        }
    };
}

impl_key_args_tuple!(A);
impl_key_args_tuple!(A, B);
impl_key_args_tuple!(A, B, C);
impl_key_args_tuple!(A, B, C, D);

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Arg(usize),
}

/// A parsed key template.
///
/// `{}` takes the next positional argument, `{n}` takes argument `n`, and
/// `{{` / `}}` are literal braces. Anything else between braces, and any
/// placeholder without a matching argument, is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTemplate {
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// Parse a template.
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut next_positional = 0;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }

                    let index = if !closed {
                        None
                    } else if inner.is_empty() {
                        let index = next_positional;
                        next_positional += 1;
                        Some(index)
                    } else {
                        inner.parse::<usize>().ok()
                    };

                    match index {
                        Some(index) => {
                            if !literal.is_empty() {
                                segments.push(Segment::Literal(std::mem::take(&mut literal)));
                            }
                            segments.push(Segment::Arg(index));
                        }
                        None => {
                            literal.push('{');
                            literal.push_str(&inner);
                            if closed {
                                literal.push('}');
                            }
                        }
                    }
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        KeyTemplate { segments }
    }

    /// Fill the template with `parts`.
    pub fn render(&self, parts: &[String]) -> String {
        let mut key = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Arg(index) => match parts.get(*index) {
                    Some(part) => key.push_str(part),
                    None => {
                        key.push('{');
                        key.push_str(&index.to_string());
                        key.push('}');
                    }
                },
            }
        }
        key
    }
}

/// How a cache key is derived from the arguments of a call.
pub struct KeyStrategy<A> {
    derive: Arc<dyn Fn(&A) -> String + Send + Sync>,
}

impl<A> Clone for KeyStrategy<A> {
    fn clone(&self) -> Self {
        KeyStrategy {
            derive: Arc::clone(&self.derive),
        }
    }
}

impl<A: 'static> KeyStrategy<A> {
    /// Derive keys by filling `template` with the call's arguments.
    ///
    /// # Example
    /// ```ignore
    /// let key = KeyStrategy::<(u64,)>::template("user:{}");
    /// assert_eq!(key.derive(&(42,)), "user:42");
    /// ```
    pub fn template(template: &str) -> Self
    where
        A: KeyArgs,
    {
        let template = KeyTemplate::parse(template);
        KeyStrategy {
            derive: Arc::new(move |args: &A| template.render(&args.key_parts())),
        }
    }

    /// Derive keys with a user-supplied function.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        KeyStrategy {
            derive: Arc::new(f),
        }
    }

    /// Derive the key for `args`.
    pub fn derive(&self, args: &A) -> String {
        (self.derive)(args)
    }
}

impl<A: KeyArgs + 'static> From<&str> for KeyStrategy<A> {
    fn from(template: &str) -> Self {
        KeyStrategy::template(template)
    }
}

impl<A: KeyArgs + 'static> From<String> for KeyStrategy<A> {
    fn from(template: String) -> Self {
        KeyStrategy::template(&template)
    }
}
