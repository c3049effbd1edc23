// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides an error type for this crate.

use core::fmt;
use std::error::Error as StdError;

/// Our main error type.
#[derive(Debug)]
pub enum Error {
    /// Error from the underlying XML tokenizer.
    XmlError(quick_xml::Error),

    /// A parse error before the stream root was ever opened. Unlike
    /// mid-stream errors, these are not recoverable.
    FatalParse(String),

    /// The data is not valid UTF-8.
    Utf8(core::str::Utf8Error),

    /// An element name contains characters that cannot appear in an XML
    /// name.
    InvalidElementName(String),

    /// An entity reference that is neither predefined nor a character
    /// reference. Those are never resolved.
    InvalidEntity(String),

    /// The end of the input was reached with an element still open.
    EndOfDocument,

    /// The input did not contain exactly one element.
    NotOneElement,
}

impl StdError for Error {
    fn cause(&self) -> Option<&dyn StdError> {
        match self {
            Error::XmlError(e) => Some(e),
            Error::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::XmlError(e) => write!(fmt, "XML error: {}", e),
            Error::FatalParse(s) => write!(fmt, "parse error before stream open: {}", s),
            Error::Utf8(e) => write!(fmt, "UTF-8 error: {}", e),
            Error::InvalidElementName(name) => write!(fmt, "invalid element name: {}", name),
            Error::InvalidEntity(name) => write!(fmt, "unresolvable entity reference: {}", name),
            Error::EndOfDocument => {
                write!(fmt, "the end of the document has been reached prematurely")
            }
            Error::NotOneElement => write!(fmt, "the input did not contain exactly one element"),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Error {
        Error::XmlError(err)
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(err: core::str::Utf8Error) -> Error {
        Error::Utf8(err)
    }
}

/// Our simplified Result type.
pub type Result<T> = core::result::Result<T, Error>;
