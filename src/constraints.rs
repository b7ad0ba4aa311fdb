use std::collections::HashSet;

use crate::size_limit::SizeLimit;

/// Represents some rules to be applied on the stream and field's content size
/// to prevent DoS attacks.
///
/// It's recommended to add some rules on field (specially text field) size to
/// avoid potential DoS attacks from attackers running the server out of memory.
/// The upload engine derives one of these from its
/// [`Limits`](crate::Limits); build one by hand when driving a
/// [`Multipart`](crate::Multipart) directly.
///
/// # Examples
///
/// ```
/// use multer_upload::{Constraints, Multipart, SizeLimit};
/// # use bytes::Bytes;
/// # use std::convert::Infallible;
/// # use futures_util::stream::once;
///
/// # async fn run() {
/// # let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// # let some_stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let constraints = Constraints::new()
///     .allowed_fields(vec!["my_text_field", "my_file_field"])
///     .size_limit(
///         SizeLimit::new()
///             // Set 15mb as size limit for the whole stream body.
///             .whole_stream(15 * 1024 * 1024)
///             // Set 10mb as size limit for all fields.
///             .per_field(10 * 1024 * 1024)
///             // Set 30kb as size limit for our text field only.
///             .for_field("my_text_field", 30 * 1024),
///     );
///
/// let mut multipart = Multipart::with_constraints(some_stream, "X-BOUNDARY", constraints);
///
/// while let Some(field) = multipart.next_field().await.unwrap() {
///     println!("{:?}", field.text().await)
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub(crate) size_limit: SizeLimit,
    pub(crate) allowed_fields: Option<HashSet<String>>,
}

impl Constraints {
    /// Creates a set of rules with default behaviour.
    pub fn new() -> Constraints {
        Constraints::default()
    }

    /// Applies rules on field's content length.
    pub fn size_limit(self, size_limit: SizeLimit) -> Constraints {
        Constraints { size_limit, ..self }
    }

    /// Specify which fields are allowed, for any unknown field
    /// [`next_field`](crate::Multipart::next_field) will throw an error.
    pub fn allowed_fields<I, N>(self, allowed_fields: I) -> Constraints
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let allowed_fields = allowed_fields.into_iter().map(Into::into).collect();

        Constraints {
            allowed_fields: Some(allowed_fields),
            ..self
        }
    }

    pub(crate) fn is_it_allowed(&self, field: Option<&str>) -> bool {
        match (&self.allowed_fields, field) {
            (None, _) => true,
            (Some(allowed), Some(field)) => allowed.contains(field),
            (Some(_), None) => false,
        }
    }
}
