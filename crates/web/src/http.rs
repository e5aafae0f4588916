//! A minimal request/response model, independent of whatever server or client carries it.

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl std::str::FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Method> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(crate::Error::MethodNotAllowed(format!("Unsupported method: {}", s))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    /// The path, without query string.
    pub path: String,
    /// Decoded query parameters, in order.  Keys may repeat.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// A user some fronting server already authenticated.
    pub remote_user: Option<String>,
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Request {
        Request {
            method,
            path: path.into(),
            query: vec![],
            headers: vec![],
            body: vec![],
            remote_user: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Request {
        Request::new(Method::Get, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Request {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Request {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Request {
        self.body = body.into();
        self.with_header("Content-Type", content_type)
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Request {
        self.remote_user = Some(user.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The content type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type")
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn query_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Response {
        Response {
            status,
            content_type: content_type.into(),
            headers: vec![],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Response {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_status(mut self, status: u16) -> Response {
        self.status = status;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("Content-Type") {
            return Some(&self.content_type);
        }
        find_header(&self.headers, name)
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_ignore_case() {
        let req = Request::get("/x")
            .with_header("accept", "text/csv")
            .with_body("Application/JSON; charset=utf-8", "[]");
        assert_eq!(req.header("Accept"), Some("text/csv"));
        assert_eq!(req.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn repeated_query_keys() {
        let req = Request::get("/x").with_query("unique", "a").with_query("unique", "b");
        assert_eq!(req.query_values("unique").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(req.query_value("nope"), None);
        assert!("PATCH".parse::<Method>().is_err());
        assert_eq!("put".parse::<Method>().unwrap(), Method::Put);
    }
}
